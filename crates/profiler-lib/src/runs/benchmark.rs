//! Interference sweep
//!
//! For every service of the application and every benchmark, benchmark agents
//! are started at increasing intensity next to the service (or the load
//! tester) while the application is driven at its calibrated capacity.

use super::{LoadDriver, ProfileRun, RunContext, RunKind, BENCHMARK_AGENT_PREFIX};
use crate::clients::BenchmarkRequest;
use crate::error::{RunError, StoreError};
use crate::models::{
    ApplicationConfig, Benchmark, BenchmarkRunResults, CalibrationResults, PlacementHost,
};
use crate::runlog::RunLog;
use crate::store::MetricKind;
use async_trait::async_trait;

/// Intensity at which a benchmark sweep stops
pub const MAX_INTENSITY: f64 = 100.0;

pub struct BenchmarkRun {
    app: ApplicationConfig,
    benchmarks: Vec<Benchmark>,
    starting_intensity: f64,
    step: f64,
    slo_tolerance: f64,
}

/// Agent started for one stage of a sweep
#[derive(Debug, Clone)]
struct StartedAgent {
    url: String,
    name: String,
}

impl BenchmarkRun {
    pub fn new(
        app: ApplicationConfig,
        benchmarks: Vec<Benchmark>,
        starting_intensity: f64,
        step: f64,
        slo_tolerance: f64,
    ) -> Result<Self, RunError> {
        if step.is_nan() || step <= 0.0 {
            return Err(RunError::Invalid(format!(
                "step must be greater than 0, got {}",
                step
            )));
        }
        Ok(Self {
            app,
            benchmarks,
            starting_intensity,
            step,
            slo_tolerance,
        })
    }

    async fn app_capacity(&self, ctx: &RunContext) -> Result<f64, RunError> {
        let document = ctx
            .metrics
            .get_metric(MetricKind::Calibration, &self.app.name)
            .await?;
        let calibration: CalibrationResults =
            serde_json::from_value(document).map_err(StoreError::from)?;
        Ok(calibration.final_result.load_intensity)
    }

    /// Start every agent of `benchmark` for one stage
    ///
    /// On failure every agent attempted so far, including the failing one,
    /// is deleted on a best-effort basis.
    #[allow(clippy::too_many_arguments)]
    async fn start_agents(
        &self,
        ctx: &RunContext,
        deployment_id: &str,
        service: &str,
        benchmark: &Benchmark,
        stage_id: &str,
        intensity: f64,
        log: &RunLog,
    ) -> Result<Vec<StartedAgent>, RunError> {
        let mut started = Vec::with_capacity(benchmark.configs.len());

        for (i, config) in benchmark.configs.iter().enumerate() {
            let colocated = match config.placement_host {
                PlacementHost::Loadtester => self.app.load_tester.name(),
                PlacementHost::Service => service,
            };
            let url = match ctx
                .deployer
                .get_colocated_service_url(deployment_id, colocated, BENCHMARK_AGENT_PREFIX)
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    self.discard_agents(ctx, &started, log).await;
                    return Err(e.into());
                }
            };

            let agent = StartedAgent {
                url,
                name: format!("{}-{}", stage_id, i),
            };
            started.push(agent.clone());

            let request = BenchmarkRequest::new(&agent.name, benchmark, config, intensity);
            if let Err(e) = ctx.agent.create_benchmark(&agent.url, &request, log).await {
                self.discard_agents(ctx, &started, log).await;
                return Err(e.into());
            }
        }

        Ok(started)
    }

    async fn discard_agents(&self, ctx: &RunContext, agents: &[StartedAgent], log: &RunLog) {
        for agent in agents {
            if let Err(e) = ctx.agent.delete_benchmark(&agent.url, &agent.name, log).await {
                log.warn(format!("Unable to clean up benchmark {}: {}", agent.name, e));
            }
        }
    }

    async fn stop_agents(
        &self,
        ctx: &RunContext,
        agents: &[StartedAgent],
        log: &RunLog,
    ) -> Result<(), RunError> {
        for agent in agents {
            ctx.agent
                .delete_benchmark(&agent.url, &agent.name, log)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRun for BenchmarkRun {
    fn kind(&self) -> RunKind {
        RunKind::Benchmark
    }

    async fn run(
        &self,
        ctx: &RunContext,
        deployment_id: &str,
        log: &RunLog,
    ) -> Result<(), RunError> {
        let app_capacity = self.app_capacity(ctx).await?;
        log.info(format!(
            "Sweeping {} benchmarks against {} at capacity {}",
            self.benchmarks.len(),
            self.app.name,
            app_capacity
        ));
        let driver = LoadDriver::resolve(ctx, &self.app, deployment_id, log).await?;

        for service in &self.app.service_names {
            let mut test_result = Vec::new();

            for benchmark in &self.benchmarks {
                let mut intensity = self.starting_intensity;

                loop {
                    let stage_id = format!("{}-{}", benchmark.name, uuid::Uuid::new_v4());
                    log.info(format!(
                        "Stage {}: {} at intensity {} next to {}",
                        stage_id, benchmark.name, intensity, service
                    ));

                    let agents = match self
                        .start_agents(ctx, deployment_id, service, benchmark, &stage_id, intensity, log)
                        .await
                    {
                        Ok(agents) => agents,
                        Err(e) => {
                            log.error(format!(
                                "Unable to start benchmark {}: {}; skipping it",
                                benchmark.name, e
                            ));
                            break;
                        }
                    };

                    match driver
                        .load_test(
                            ctx,
                            &self.app,
                            &stage_id,
                            &benchmark.name,
                            app_capacity,
                            intensity,
                            log,
                        )
                        .await
                    {
                        Ok(samples) => test_result.extend(samples),
                        Err(e) => log.warn(format!("Load test of stage {} failed: {}", stage_id, e)),
                    }

                    self.stop_agents(ctx, &agents, log).await?;

                    if intensity >= MAX_INTENSITY {
                        break;
                    }
                    intensity += self.step;
                }
            }

            let results = BenchmarkRunResults {
                test_id: format!("{}-{}", log.run_id(), service),
                app_name: self.app.name.clone(),
                service_in_test: service.clone(),
                app_capacity,
                slo_tolerance: self.slo_tolerance,
                slo: self.app.slo.clone(),
                benchmarks: self.benchmarks.iter().map(|b| b.name.clone()).collect(),
                test_result,
            };
            ctx.write_result(MetricKind::Profiling, &results, log).await?;
        }

        Ok(())
    }
}
