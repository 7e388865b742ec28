pub mod lipsync;
pub mod ui;
