//! Captions: alignment, estimated timing, text cleanup and rendering.

pub mod align;
pub mod estimate;
pub mod render;
pub mod text;

pub use align::{align, ends_sentence, AlignConfig};
pub use estimate::{estimate_timing, WORDS_PER_MINUTE};
pub use render::{render_srt, render_vtt, wrap_text, WrapConfig};
pub use text::{clean_script, word_count};
