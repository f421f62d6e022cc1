//! Post-processing: tone mapping and the selection silhouette.

pub mod silhouette;
pub mod tonemap;

pub use silhouette::{silhouette_mask, SilhouettePass};
pub use tonemap::{tonemap, ToneCurve, ToneMapPass, ToneMapSettings};
