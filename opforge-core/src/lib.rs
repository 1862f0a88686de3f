//! # opforge-core
//!
//! Operator catalog, kernel dispatch and gradient-graph construction for a
//! dataflow tensor runtime.
//!
//! An operator type is registered once as an
//! [`OperatorDef`](registry::OperatorDef): its [`Schema`](schema::Schema), a
//! shape/type inference rule, an optional gradient maker, its no-need-buffer
//! slots and its kernels. Registration ends with an immutable
//! [`Catalog`](registry::Catalog) that graphs and executors share.
//!
//! ```
//! use opforge_core::attribute::{attrs, AttrValue};
//! use opforge_core::graph::Graph;
//! use opforge_core::node::OperatorNode;
//! use opforge_core::types::DType;
//!
//! let catalog = opforge_core::registry::init_global().expect("catalog");
//! let mut graph = Graph::new(catalog);
//! graph.declare_var("x", vec![4, 10], DType::F32);
//! graph.declare_var("target", vec![4, 10], DType::F32);
//! let node = OperatorNode::builder("kldiv_loss")
//!     .input("X", ["x"])
//!     .input("Target", ["target"])
//!     .output("Loss", ["loss"])
//!     .attrs(attrs([("reduction", AttrValue::from("none"))]))
//!     .build();
//! graph.add_node(node).expect("valid node");
//! assert_eq!(graph.var("loss").map(|d| d.shape.dims().to_vec()), Some(vec![4, 10]));
//! ```

pub mod attribute;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod grad;
pub mod graph;
pub mod infer_shape;
pub mod kernel;
pub mod node;
pub mod ops;
pub mod registry;
pub mod schema;
pub mod scope;
pub mod shape;
pub mod tensor;
pub mod types;
pub mod utils;

pub use config::ExecutorConfig;
pub use device::DeviceKind;
pub use error::OpError;
pub use executor::Executor;
pub use graph::{Graph, NodeId};
pub use node::OperatorNode;
pub use registry::{Catalog, CatalogBuilder, OperatorDef};
pub use tensor::Tensor;
pub use types::DType;
