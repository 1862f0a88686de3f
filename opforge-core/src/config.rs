/// Runtime options of an [`Executor`](crate::executor::Executor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Check every tensor a kernel produced against the runtime-inferred
    /// descriptor of its output variable before writing it to the scope.
    pub verify_outputs: bool,
    /// While running a graph, replace each variable bound to a no-need-buffer
    /// input slot with a metadata-only copy once its last reader has run.
    /// Single-node runs never release.
    pub release_no_need_buffers: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            verify_outputs: true,
            release_no_need_buffers: false,
        }
    }
}

impl ExecutorConfig {
    pub fn with_verify_outputs(mut self, verify: bool) -> Self {
        self.verify_outputs = verify;
        self
    }

    pub fn with_release_no_need_buffers(mut self, release: bool) -> Self {
        self.release_no_need_buffers = release;
        self
    }
}
