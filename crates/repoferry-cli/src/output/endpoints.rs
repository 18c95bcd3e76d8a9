// SPDX-License-Identifier: Apache-2.0

use console::style;
use std::io::{self, Write};

use crate::cli::OutputContext;
use crate::commands::types::EndpointsResult;

use super::Renderable;

impl Renderable for EndpointsResult {
    fn render_text(&self, w: &mut dyn Write, _ctx: &OutputContext) -> io::Result<()> {
        let label = |name: &str| style(format!("{name:<12}")).bold();

        writeln!(w, "{} {}", label("Topology:"), style(self.topology).cyan())?;
        writeln!(w, "{} {}", label("REST:"), self.rest_base)?;
        writeln!(w, "{} {}", label("GraphQL:"), self.graphql_endpoint)?;
        writeln!(w, "{} {}", label("Web:"), self.web_root)?;
        if let Some(url) = &self.web_url {
            writeln!(w, "{} {}", label("Repository:"), url)?;
        }
        Ok(())
    }
}
