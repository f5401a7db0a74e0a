#[cfg(test)]
mod executor_tests;
#[cfg(test)]
mod runtime_tests;
