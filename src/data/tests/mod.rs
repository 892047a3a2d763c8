//! End-to-end tests for cube loading.
//!
//! These tests write real files to a temporary directory and load them back
//! through the registry, checking that every format and storage order ends up
//! in the same canonical cube.


mod load_path_tests;
