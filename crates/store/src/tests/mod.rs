mod helpers;

mod sink_tests;
