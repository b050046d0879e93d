// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! SMTP submission surface of the pelican mail gateway.
//!
//! A mail client submits RFC 5322 messages over a standard ESMTP subset;
//! each accepted `DATA` runs the outbound send pipeline against the
//! encrypted upstream service.
#![deny(unsafe_code, clippy::unwrap_used)]
#![warn(
    clippy::cognitive_complexity,
    clippy::branches_sharing_code,
    clippy::imprecise_flops,
    clippy::missing_const_for_fn,
    clippy::mutex_integer,
    clippy::path_buf_push_overwrite,
    clippy::redundant_pub_crate,
    clippy::pedantic,
    clippy::dbg_macro,
    clippy::todo,
    clippy::fallible_impl_from,
    clippy::filetype_is_file,
    clippy::suboptimal_flops,
    clippy::fn_to_numeric_cast_any,
    clippy::if_then_some_else_none,
    clippy::lossy_float_literal,
    clippy::clone_on_ref_ptr
)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod error;
pub mod servers;
pub mod session;

pub(crate) mod send;

#[cfg(test)]
pub(crate) mod testutil;
