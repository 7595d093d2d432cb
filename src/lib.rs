// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

//! Feeder network consolidation: groups raw distribution-line fragments by
//! feeder, merges them into connected paths, reduces vertex count without
//! breaking topology, derives capacity metrics and writes a compact layer.

pub mod compact;
pub mod config;
pub mod error;
pub mod geojson_io;
pub mod grouping;
pub mod metrics;
pub mod pipeline;
pub mod reconstruct;
pub mod reduce;
pub mod screen;
pub mod segments;
pub mod simplify;


pub use config::{EngineConfig, Preset};
pub use error::FeederError;
pub use pipeline::{BatchReport, ScreenedFeature, run};
pub use reduce::ReducePolicy;
