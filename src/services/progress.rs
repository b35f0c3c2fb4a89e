//! Progress reporting service
//!
//! Frontends plug in their own `ProgressReporter`; the pipeline only emits
//! stage transitions and final timings.

use crate::types::PipelineTimings;
use instant::Instant;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Checking the input size cap
    Validation,
    /// Detecting the format and decoding pixels
    Decoding,
    /// Shrinking the decoded image to the dimension cap
    Downscaling,
    /// Running the tool's transform
    Transform,
    /// Flattening and encoding the output
    Encoding,
    /// Processing completed
    Completed,
}

impl ProcessingStage {
    /// Human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::Validation => "Validating input",
            ProcessingStage::Decoding => "Decoding image",
            ProcessingStage::Downscaling => "Downscaling image",
            ProcessingStage::Transform => "Applying transform",
            ProcessingStage::Encoding => "Encoding output",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Typical progress percentage when the stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::Validation => 5,
            ProcessingStage::Decoding => 15,
            ProcessingStage::Downscaling => 30,
            ProcessingStage::Transform => 40,
            ProcessingStage::Encoding => 90,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self::with_description(stage, stage.description().to_string(), start_time)
    }

    /// Create a progress update with a custom description
    #[must_use]
    pub fn with_description(
        stage: ProcessingStage,
        description: String,
        start_time: Instant,
    ) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }
}

/// Receives progress from pipeline runs
pub trait ProgressReporter: Send + Sync {
    /// Report a stage transition
    fn report_progress(&self, update: ProgressUpdate);

    /// Report successful completion with final timings
    fn report_completion(&self, tool: &str, timings: &PipelineTimings);

    /// Report an error at the given stage
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// Reporter that discards everything
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _tool: &str, _timings: &PipelineTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Reporter that forwards to the `log` facade
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::debug!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, tool: &str, timings: &PipelineTimings) {
        log::info!("{} completed in {}ms", tool, timings.total_ms);

        if self.verbose {
            let breakdown = timings.breakdown_percentages();
            log::info!(
                "  decode {}ms ({:.1}%), transform {}ms ({:.1}%), encode {}ms ({:.1}%)",
                timings.decode_ms,
                breakdown.decode_pct,
                timings.transform_ms,
                breakdown.transform_pct,
                timings.encode_ms,
                breakdown.encode_pct
            );
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("Error during {}: {}", stage.description(), error);
    }
}

/// Tracks the current stage and elapsed time of one pipeline run
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Tracker that reports nothing
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter))
    }

    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(Box::new(ConsoleProgressReporter::new(verbose)))
    }

    /// Reset the clock and stage for a new run
    pub fn restart(&mut self) {
        self.start_time = Instant::now();
        self.current_stage = None;
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    pub fn report_stage_with_description(&mut self, stage: ProcessingStage, description: String) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::with_description(stage, description, self.start_time));
    }

    pub fn report_completion(&self, tool: &str, timings: &PipelineTimings) {
        self.reporter.report_completion(tool, timings);
    }

    /// Report an error at the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::Validation);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current_stage", &self.current_stage)
            .finish_non_exhaustive()
    }
}
