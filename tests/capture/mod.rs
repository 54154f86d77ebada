//! Capture store tests.
