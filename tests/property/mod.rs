// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! This module contains property-based tests using proptest for StreamLoop
//! resolution and propagation through resolved cycles.

mod loop_resolution;
