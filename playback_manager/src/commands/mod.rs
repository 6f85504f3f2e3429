pub mod bookmarks;
pub mod info;
pub mod play;
pub mod synth;
