// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use pelican_deps::color_eyre::{owo_colors::OwoColorize, section::PanicMessage};

/// Panic message pointing users at the issue tracker.
pub struct PelicanPanicMessage;

impl PanicMessage for PelicanPanicMessage {
    fn display(
        &self,
        pi: &std::panic::PanicInfo<'_>,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "{}", "The gateway crashed.".red())?;
        writeln!(f)?;

        if let Some(payload) = pi.payload().downcast_ref::<String>() {
            writeln!(f, "Message:  {}", payload.cyan())?;
        } else if let Some(payload) = pi.payload().downcast_ref::<&str>() {
            writeln!(f, "Message:  {}", payload.cyan())?;
        }

        if let Some(location) = pi.location() {
            writeln!(
                f,
                "Location: {}:{}",
                location.file().purple(),
                location.line().purple()
            )?;
        }

        writeln!(
            f,
            "Please report this at {}",
            "https://github.com/pelican-mail/pelican/issues".cyan()
        )
    }
}
