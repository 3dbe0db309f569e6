mod support;

mod build_tests;
mod scheduler_tests;
mod watch_tests;
