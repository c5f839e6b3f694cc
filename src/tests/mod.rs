// Test modules for fwd-listener
// Each module covers the corresponding source file; `mock` holds the shared
// in-memory gateway and sockets.

mod aio_tests;
mod mock;
