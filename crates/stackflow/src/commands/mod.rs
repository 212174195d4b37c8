pub mod apply;
pub mod destroy;
pub mod output;
pub mod plan;
pub mod refresh;
pub mod state;
pub mod synth;
pub mod validate;
