//! Building blocks for visualizing image-embedding manifolds and for moving
//! labelled cell-image data between annotation archives, TFRecord training
//! files and learned-encoding stores.
//!
//! The core of the crate is [`projection::ManifoldProjection2D`], which bins a
//! set of 2D-embedded images into a regular grid and composites the per-bin
//! mean images into one large canvas for plotting.

pub mod annotations;
pub mod dataset;
pub mod encodings;
pub mod model;
pub mod projection;
pub mod util;
