#[cfg(test)]
mod path_tests;
