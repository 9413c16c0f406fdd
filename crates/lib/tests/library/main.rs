mod common;
mod live_tests;
mod overlay_tests;
mod scenario_tests;
