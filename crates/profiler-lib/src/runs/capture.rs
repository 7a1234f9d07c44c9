//! Capture run: a single load test, no interference and no stored document

use super::{CaptureGenerator, ProfileRun, RunContext, RunKind};
use crate::clients::{DemoUiLoadTest, SlowCookerBenchmarkRequest};
use crate::error::RunError;
use crate::models::{ApplicationConfig, LoadTester};
use crate::runlog::RunLog;
use async_trait::async_trait;

/// Service name of the demo UI load generator
pub const DEMO_UI_SERVICE: &str = "demo-ui";

const DEFAULT_LOAD_TIME: &str = "5m";

pub struct CaptureRun {
    app: ApplicationConfig,
    generator: CaptureGenerator,
    load_time: Option<String>,
}

impl CaptureRun {
    pub fn new(
        app: ApplicationConfig,
        generator: Option<CaptureGenerator>,
        load_time: Option<String>,
    ) -> Self {
        let generator = generator.unwrap_or(match app.load_tester {
            LoadTester::SlowCooker(_) => CaptureGenerator::SlowCooker,
            _ => CaptureGenerator::DemoUi,
        });
        Self {
            app,
            generator,
            load_time,
        }
    }

    pub fn generator(&self) -> CaptureGenerator {
        self.generator
    }
}

#[async_trait]
impl ProfileRun for CaptureRun {
    fn kind(&self) -> RunKind {
        RunKind::Capture
    }

    async fn run(
        &self,
        ctx: &RunContext,
        deployment_id: &str,
        log: &RunLog,
    ) -> Result<(), RunError> {
        let run_id = log.run_id();

        let response = match self.generator {
            CaptureGenerator::SlowCooker => {
                let LoadTester::SlowCooker(spec) = &self.app.load_tester else {
                    return Err(RunError::Invalid(format!(
                        "{} is not driven by slow-cooker",
                        self.app.name
                    )));
                };
                let url = ctx.deployer.get_service_url(deployment_id, &spec.name).await?;
                let mut app_load = spec.app_load.clone();
                if let Some(load_time) = &self.load_time {
                    app_load.load_time = load_time.clone();
                }
                let request = SlowCookerBenchmarkRequest {
                    app_intensity: f64::from(app_load.concurrency),
                    benchmark_intensity: 0.0,
                    load_time: app_load.load_time.clone(),
                    app_load,
                };
                ctx.slow_cooker
                    .run_benchmark(&url, run_id, &request, log)
                    .await?
            }
            CaptureGenerator::DemoUi => {
                let url = ctx
                    .deployer
                    .get_service_url(deployment_id, DEMO_UI_SERVICE)
                    .await?;
                let request = DemoUiLoadTest {
                    app_name: self.app.name.clone(),
                    load_time: self
                        .load_time
                        .clone()
                        .unwrap_or_else(|| DEFAULT_LOAD_TIME.to_string()),
                };
                ctx.demo_ui.run_load_test(&url, run_id, &request, log).await?
            }
        };

        log.info(format!(
            "Capture load test finished with {} runs",
            response.results.len()
        ));
        Ok(())
    }
}
