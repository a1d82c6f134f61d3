pub mod distributed;
pub mod gpu;
pub mod logging;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
