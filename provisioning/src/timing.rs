//! Elapsed-time logging for whole engine runs.
//!
//! ```rust,no_run
//! use mgf_provisioning::measure_time;
//! # fn build_plan() -> Vec<String> { Vec::new() }
//!
//! let plan = measure_time!("plan_project", {
//!     build_plan()
//! });
//! ```

/// Measure execution time of a synchronous block
///
/// Logs via `tracing::info!` with fields `operation` (the label) and
/// `elapsed_ms`. Returns the value of the block.
#[macro_export]
macro_rules! measure_time {
    ($label:expr, $block:block) => {{
        let __start = std::time::Instant::now();
        let __result = $block;
        let __elapsed = __start.elapsed();
        ::tracing::info!(
            operation = $label,
            elapsed_ms = __elapsed.as_millis() as u64,
            "Operation completed"
        );
        __result
    }};
}
