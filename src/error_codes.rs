// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Process exit codes.

/// Fatal failures: invalid configuration, missing DB schema, and any
/// unrecoverable runtime error. The CLI contract pins these to 1.
pub const ERROR_CODE_FATAL: i32 = 1;

/// The broker was unreachable at startup.
pub const ERROR_CODE_BROKER_UNREACHABLE: i32 = 2;
