mod common;
mod report_tests;
mod station_tests;
