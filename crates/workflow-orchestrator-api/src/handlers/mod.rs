// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One module per row of the `/api` table in §6.

pub mod approvals;
pub mod graph;
pub mod invoke;
pub mod status;
pub mod stream;
