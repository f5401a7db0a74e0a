// Configuration test module
#[cfg(test)]
mod resolver_tests;
