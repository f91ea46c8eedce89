//! Backend without syscall interception.

use crate::error::CaptureError;
use crate::supervise::run_supervised;
use crate::tracer::{Launch, RawCapture, Tracer};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Records stdout, stderr and the exit status only
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOnlyTracer;

impl OutputOnlyTracer {
    /// Create the backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tracer for OutputOnlyTracer {
    fn name(&self) -> &'static str {
        "output-only"
    }

    async fn ensure_available(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn run(
        &self,
        launch: &Launch,
        cancel: &CancellationToken,
    ) -> Result<RawCapture, CaptureError> {
        let mut command = Command::new(&launch.program);
        command.args(&launch.args).current_dir(&launch.workdir);
        let run = run_supervised(
            command,
            &launch.program.display().to_string(),
            launch.input.clone(),
            launch.timeout,
            cancel,
        )
        .await?;
        Ok(RawCapture::output_only(run.chunks, run.exit, run.timed_out))
    }
}
