#[cfg(test)]
mod sink_tests;
