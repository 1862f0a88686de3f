use std::fmt;

/// The kind of device an execution context runs on.
///
/// Together with the operator type and the data type it forms a
/// [`KernelKey`](crate::kernel::KernelKey). There is no implicit fallback
/// between kinds: a kernel registered for `CPU` is never selected for `GPU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DeviceKind {
    /// Host memory and host threads. This is the default device.
    #[default]
    CPU,
    /// An accelerator device. Tensors on it carry a placeholder buffer only.
    GPU,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::CPU => write!(f, "CPU"),
            DeviceKind::GPU => write!(f, "GPU"),
        }
    }
}
