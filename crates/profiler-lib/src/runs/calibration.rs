//! Calibration run: find the load the application sustains within its SLO

use super::{missing_final_result, LoadDriver, ProfileRun, RunContext, RunKind};
use crate::clients::{ControllerCalibrationRequest, ControllerRun, SlowCookerCalibrationRequest};
use crate::error::{ClientError, RunError};
use crate::models::{ApplicationConfig, CalibrationResults, CalibrationSample};
use crate::runlog::RunLog;
use crate::store::MetricKind;
use async_trait::async_trait;

pub struct CalibrationRun {
    app: ApplicationConfig,
}

impl CalibrationRun {
    pub fn new(app: ApplicationConfig) -> Self {
        Self { app }
    }

    async fn calibrate(
        &self,
        ctx: &RunContext,
        deployment_id: &str,
        log: &RunLog,
    ) -> Result<CalibrationResults, RunError> {
        let run_id = log.run_id();
        let driver = LoadDriver::resolve(ctx, &self.app, deployment_id, log).await?;

        let (test_results, final_result) = match driver {
            LoadDriver::Controller { url, spec, args } => {
                let intensity_arg = spec
                    .intensity_args
                    .first()
                    .map(|arg| arg.name.clone())
                    .ok_or_else(|| {
                        RunError::Invalid(format!(
                            "benchmark controller of {} has no intensity arguments",
                            self.app.name
                        ))
                    })?;

                let request = ControllerCalibrationRequest {
                    stage_id: run_id.to_string(),
                    app_name: self.app.name.clone(),
                    load_tester_name: spec.name.clone(),
                    command: spec.command.clone(),
                    args,
                    intensity_args: spec.intensity_args.clone(),
                    slo: self.app.slo.clone(),
                };
                let response = ctx.controller.run_calibration(&url, &request, log).await?;

                let sample = |run: &ControllerRun| -> Result<CalibrationSample, RunError> {
                    let load_intensity =
                        run.intensity_args.get(&intensity_arg).copied().ok_or_else(|| {
                            ClientError::Decode(format!(
                                "controller result has no value for intensity argument {}",
                                intensity_arg
                            ))
                        })?;
                    Ok(CalibrationSample {
                        load_intensity,
                        qos_value: run.qos_value,
                    })
                };
                let samples = response
                    .results
                    .iter()
                    .map(&sample)
                    .collect::<Result<Vec<_>, _>>()?;
                let final_result = match response.final_result.as_ref() {
                    Some(run) => sample(run)?,
                    None => return Err(missing_final_result("controller calibration")),
                };
                (samples, final_result)
            }
            LoadDriver::SlowCooker { url, spec } => {
                let request = SlowCookerCalibrationRequest {
                    app_load: spec.app_load.clone(),
                    calibrate: spec.calibrate.clone(),
                    slo: self.app.slo.clone(),
                };
                let response = ctx
                    .slow_cooker
                    .run_calibration(&url, run_id, &request, log)
                    .await?;

                let percentile = self.app.slo.percentile();
                let samples = response
                    .results
                    .iter()
                    .map(|run| CalibrationSample {
                        load_intensity: run.concurrency,
                        qos_value: run.latency.get(percentile),
                    })
                    .collect();
                let final_result = match (response.final_concurrency, response.final_latency_ms) {
                    (Some(concurrency), Some(latency)) => CalibrationSample {
                        load_intensity: concurrency,
                        qos_value: latency,
                    },
                    _ => return Err(missing_final_result("slow-cooker calibration")),
                };
                (samples, final_result)
            }
        };

        Ok(CalibrationResults {
            test_id: run_id.to_string(),
            app_name: self.app.name.clone(),
            load_tester: self.app.load_tester.name().to_string(),
            qos_metrics: vec![self.app.slo.metric.clone()],
            test_results,
            final_result,
        })
    }
}

#[async_trait]
impl ProfileRun for CalibrationRun {
    fn kind(&self) -> RunKind {
        RunKind::Calibration
    }

    async fn run(
        &self,
        ctx: &RunContext,
        deployment_id: &str,
        log: &RunLog,
    ) -> Result<(), RunError> {
        log.info(format!("Calibrating {}", self.app.name));
        let results = self.calibrate(ctx, deployment_id, log).await?;

        log.info(format!(
            "Calibration of {} found capacity {} at {} {}",
            self.app.name,
            results.final_result.load_intensity,
            self.app.slo.metric,
            results.final_result.qos_value
        ));
        ctx.write_result(MetricKind::Calibration, &results, log).await
    }
}
