//! The `conductor check` command.
//!
//! Loads, merges and parses a descriptor without touching the disk, then
//! lists the paths an `apply` would produce.

use std::io::Write;

use super::dispatcher::{Command, CommandResult};
use crate::cli::args::DescriptorArgs;
use crate::config::Settings;
use crate::error::Result;
use crate::node::{Node, NodeKind};
use crate::runner::LifecycleRunner;
use crate::template::TemplateLoader;

/// Validates a descriptor.
pub struct CheckCommand {
    settings: Settings,
    args: DescriptorArgs,
}

impl CheckCommand {
    pub fn new(settings: Settings, args: DescriptorArgs) -> Self {
        Self { settings, args }
    }
}

impl Command for CheckCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let template = TemplateLoader::new(self.settings.clone()).load(&self.args.descriptor)?;
        let mut nodes = template.build_filesystem_model()?;
        LifecycleRunner::new(&template).parse_all(&mut nodes)?;

        let mut planned: Vec<&Node> = Vec::new();
        for root in &nodes {
            root.walk(&mut |node| planned.push(node));
        }

        writeln!(
            out,
            "{} v{}: {} paths",
            template.name(),
            template.metadata().version,
            planned.len()
        )?;
        for node in planned {
            let marker = match node.kind() {
                NodeKind::File => "file  ",
                NodeKind::Folder => "folder",
            };
            let plugins: Vec<&str> = node.plugins().iter().map(|p| p.name()).collect();
            if plugins.is_empty() {
                writeln!(out, "  {marker} {}", node.relative_path().display())?;
            } else {
                writeln!(
                    out,
                    "  {marker} {} [{}]",
                    node.relative_path().display(),
                    plugins.join(", ")
                )?;
            }
        }
        Ok(CommandResult::success())
    }
}
