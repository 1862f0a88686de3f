//! # Shipped Operators (`ops`)
//!
//! Every operator type the process-wide catalog knows about, plus the helpers
//! their host kernels share.
//!
//! ## Structure:
//!
//! - **One module per forward operator.** Each module defines the forward and
//!   the `_grad` operator types: schema, shape rule, gradient maker and CPU
//!   kernels, and exposes a `register` function adding both to a
//!   [`CatalogBuilder`].
//! - **Kernels** are written once, generically over
//!   [`HostElement`](crate::buffer::HostElement), and instantiated for `f32` and
//!   `f64` at registration.
//! - [`register_all`] is the explicit registration list consumed by
//!   [`registry::init_global`](crate::registry::init_global).
//!
//! ## Key Submodules:
//!
//! - [`loss`]: loss functions (`kldiv_loss`, `mse_loss`).
//! - [`reduction`]: the `reduction` attribute shared by the losses.

use crate::error::OpError;
use crate::registry::CatalogBuilder;

pub mod loss;
pub mod reduction;

pub use reduction::Reduction;

/// Registers every shipped operator type and its kernels.
pub fn register_all(builder: &mut CatalogBuilder) -> Result<(), OpError> {
    loss::kldiv_loss::register(builder)?;
    loss::mse_loss::register(builder)?;
    Ok(())
}
