//! The `conductor show` command.

use std::io::Write;

use super::dispatcher::{Command, CommandResult};
use crate::cli::args::DescriptorArgs;
use crate::config::Settings;
use crate::error::{ConductorError, Result};
use crate::template::TemplateLoader;

/// Prints the merged descriptor as JSON.
pub struct ShowCommand {
    settings: Settings,
    args: DescriptorArgs,
}

impl ShowCommand {
    pub fn new(settings: Settings, args: DescriptorArgs) -> Self {
        Self { settings, args }
    }
}

impl Command for ShowCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let template = TemplateLoader::new(self.settings.clone()).load(&self.args.descriptor)?;
        let rendered = serde_json::to_string_pretty(&template.merged_descriptor())
            .map_err(|e| ConductorError::Other(e.into()))?;
        writeln!(out, "{rendered}")?;
        Ok(CommandResult::success())
    }
}
