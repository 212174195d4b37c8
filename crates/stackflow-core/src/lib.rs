//! StackFlow Core
//!
//! スタック宣言、参照解決、依存グラフ、シンセサイズを提供します。
//!
//! ```text
//! stack.kdl ──(template/parser)──▶ StackDefinition
//! StackBuilder ─────────────────▶ ReferenceResolver ──▶ ResourceGraph ──▶ SynthDocument
//! ```

pub mod builder;
pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod parser;
pub mod resolver;
pub mod synth;
pub mod template;
pub mod token;

pub use builder::{ResourceHandle, StackBuilder};
pub use error::{Result, StackError};
pub use graph::{Edge, ResourceGraph};
pub use loader::{load_definition, load_stack, render_stack_file};
pub use model::*;
pub use parser::{parse_stack_file, parse_stack_string};
pub use resolver::{ReferencePolicy, ReferenceResolver};
pub use synth::{SYNTH_FORMAT_VERSION, SynthDocument, SynthOutput, SynthResource, synthesize};
pub use template::{TemplateProcessor, Variables, extract_variables, parse_variable_override};
