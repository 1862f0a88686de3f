use crate::error::OpError;
use crate::kernel::KernelContext;
use crate::shape::Shape;
use num_traits::Float;
use std::fmt;
use std::str::FromStr;

/// Name of the attribute carrying the reduction.
pub const REDUCTION_ATTR: &str = "reduction";

/// Specifies the reduction to apply to an element-wise loss:
/// 'none' | 'mean' | 'sum' | 'batchmean'
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reduction {
    /// Keep the per-element losses.
    None,
    Mean,
    Sum,
    /// Sum divided by the size of dimension 0.
    BatchMean,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
            Reduction::BatchMean => "batchmean",
        }
    }

    /// Reads the `reduction` attribute inside a kernel. An unrecognized value
    /// becomes a `KernelFailure` for the running operator.
    pub fn from_kernel_attr(ctx: &KernelContext<'_>) -> Result<Self, OpError> {
        let value = ctx.attr_str(REDUCTION_ATTR)?;
        value
            .parse()
            .map_err(|e: OpError| OpError::kernel_failure(ctx.op_type(), e.to_string()))
    }

    /// Shape of the loss for an input of shape `input`.
    pub fn output_shape(&self, input: &Shape) -> Shape {
        match self {
            Reduction::None => input.clone(),
            _ => Shape::scalar(),
        }
    }

    /// Reduces per-element losses. `batch` is the size of dimension 0.
    pub fn apply<T: Float>(&self, values: Vec<T>, batch: usize) -> Vec<T> {
        if *self == Reduction::None {
            return values;
        }
        let scale = self.grad_scale::<T>(values.len(), batch);
        let total = values.into_iter().fold(T::zero(), |acc, v| acc + v);
        vec![total * scale]
    }

    /// Factor relating the reduced loss to each element's contribution.
    pub fn grad_scale<T: Float>(&self, numel: usize, batch: usize) -> T {
        let denom = match self {
            Reduction::None | Reduction::Sum => return T::one(),
            Reduction::Mean => numel,
            Reduction::BatchMean => batch,
        };
        match T::from(denom) {
            Some(d) if denom > 0 => T::one() / d,
            _ => T::nan(),
        }
    }
}

impl FromStr for Reduction {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Reduction::None),
            "mean" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            "batchmean" => Ok(Reduction::BatchMean),
            _ => Err(OpError::InternalError(format!("Unsupported reduction type: {}", s))),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "reduction_test.rs"]
mod tests;
