//! The `conductor apply` command.

use std::io::Write;
use tracing::info;

use super::dispatcher::{Command, CommandResult};
use crate::cli::args::DescriptorArgs;
use crate::config::Settings;
use crate::error::Result;
use crate::runner::LifecycleRunner;
use crate::template::TemplateLoader;

/// Loads a descriptor and runs the full lifecycle.
pub struct ApplyCommand {
    settings: Settings,
    args: DescriptorArgs,
}

impl ApplyCommand {
    pub fn new(settings: Settings, args: DescriptorArgs) -> Self {
        Self { settings, args }
    }
}

impl Command for ApplyCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let template = TemplateLoader::new(self.settings.clone()).load(&self.args.descriptor)?;
        info!(
            "Applying '{}' into {}",
            template.name(),
            template.work_dir().display()
        );

        let summary = LifecycleRunner::new(&template).run()?;

        writeln!(
            out,
            "Applied '{}': {} files, {} folders into {}",
            template.name(),
            summary.files,
            summary.folders,
            template.work_dir().display()
        )?;
        Ok(CommandResult::success())
    }
}
