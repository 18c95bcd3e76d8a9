// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use console::style;
use std::io::{self, Write};

use crate::cli::OutputContext;
use crate::commands::types::RateLimitResult;

use super::Renderable;

impl Renderable for RateLimitResult {
    fn render_text(&self, w: &mut dyn Write, ctx: &OutputContext) -> io::Result<()> {
        writeln!(w)?;
        writeln!(w, "{}", style("API quota:").bold())?;
        writeln!(w)?;

        let now = Utc::now();
        for entry in &self.entries {
            let who = format!(
                "{:<12} {:<22}",
                entry.side.to_string(),
                entry.strategy.to_string()
            );
            let quota = format!("{:>12}", format!("{}/{}", entry.remaining, entry.limit));
            let quota = if entry.low {
                style(quota).red()
            } else {
                style(quota).green()
            };

            let reset = match entry.reset_at {
                Some(at) if ctx.verbose => format!("resets at {}", at.to_rfc3339()),
                Some(at) => {
                    let minutes = (at - now).num_minutes().max(0);
                    format!("resets in {minutes}m")
                }
                None => String::new(),
            };

            writeln!(w, "  {} {}  {}", style(who).cyan(), quota, style(reset).dim())?;
        }

        writeln!(w)?;
        Ok(())
    }
}
