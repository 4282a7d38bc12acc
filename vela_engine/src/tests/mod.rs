mod fixtures;
mod live_tests;
mod pipeline_tests;
