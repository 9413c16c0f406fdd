mod apply_tests;
mod common;
mod discard_tests;
mod restore_tests;
mod status_tests;
