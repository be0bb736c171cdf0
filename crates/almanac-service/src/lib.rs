pub mod error;
pub mod feed;
pub mod occurrence;

#[cfg(test)]
pub(crate) mod test_support;
