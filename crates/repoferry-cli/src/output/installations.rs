// SPDX-License-Identifier: Apache-2.0

use console::style;
use std::io::{self, Write};

use crate::cli::OutputContext;
use crate::commands::types::InstallationsResult;

use super::Renderable;

impl Renderable for InstallationsResult {
    fn render_text(&self, w: &mut dyn Write, _ctx: &OutputContext) -> io::Result<()> {
        writeln!(w)?;
        writeln!(
            w,
            "{} {}",
            style("App installations").bold(),
            style(format!("({})", self.side)).dim()
        )?;
        writeln!(w)?;

        if self.installations.is_empty() {
            writeln!(w, "  {}", style("No installations found").dim())?;
        }

        for installation in &self.installations {
            let id = format!("{:>10}", installation.id);
            let account = format!("{:<30}", installation.account);
            let target = installation.target_type.as_deref().unwrap_or("-");
            let selection = installation.repository_selection.as_deref().unwrap_or("-");

            writeln!(
                w,
                "  {} {} {} {}",
                style(id).dim(),
                style(account).cyan(),
                style(format!("{target:<14}")).yellow(),
                style(selection).dim()
            )?;
        }

        writeln!(w)?;
        Ok(())
    }
}
