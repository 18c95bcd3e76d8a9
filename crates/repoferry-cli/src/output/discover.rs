// SPDX-License-Identifier: Apache-2.0

use console::style;
use std::io::{self, Write};

use crate::cli::OutputContext;
use crate::commands::types::DiscoverResult;

use super::Renderable;

impl Renderable for DiscoverResult {
    fn render_text(&self, w: &mut dyn Write, ctx: &OutputContext) -> io::Result<()> {
        writeln!(w)?;
        writeln!(
            w,
            "{} {} {}",
            style("Repositories of").bold(),
            style(&self.org).bold().cyan(),
            style(format!("({}, via {})", self.side, self.strategy)).dim()
        )?;
        writeln!(w)?;

        if self.repositories.is_empty() {
            writeln!(w, "  {}", style("No repositories found").dim())?;
            writeln!(w)?;
            return Ok(());
        }

        for (i, repo) in self.repositories.iter().enumerate() {
            let num = format!("{:>4}.", i + 1);
            let name = format!("{:<40}", repo.full_name);
            let size = format!("{:>10} KB", repo.size_kb);

            let mut flags = Vec::new();
            if repo.private {
                flags.push("private");
            }
            if repo.archived {
                flags.push("archived");
            }

            write!(
                w,
                "  {} {} {} {}",
                style(num).dim(),
                style(name).cyan(),
                style(size).yellow(),
                style(flags.join(", ")).dim()
            )?;
            if ctx.verbose {
                write!(w, " {}", style(&repo.web_url).dim())?;
            }
            writeln!(w)?;
        }

        let total_kb: u64 = self.repositories.iter().map(|r| u64::from(r.size_kb)).sum();
        writeln!(w)?;
        writeln!(
            w,
            "  {} repositories, {} KB total",
            self.repositories.len(),
            total_kb
        )?;
        writeln!(w)?;
        Ok(())
    }
}
