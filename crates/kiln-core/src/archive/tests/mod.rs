#[cfg(test)]
mod http_tests;
