//! `check` subcommand: validate a catalog and summarize it.

use std::path::Path;

use crate::config::{CommandCatalog, Config, ParameterKind};

/// One line per command: name, parameters, confirmation and action.
pub fn describe_catalog(catalog: &CommandCatalog) -> String {
    let mut out = String::new();
    for command in catalog.commands() {
        let params: Vec<String> = command
            .parameters
            .iter()
            .map(|p| {
                let kind = match p.kind {
                    ParameterKind::Inline => "inline",
                    ParameterKind::Choice { .. } => "choice",
                    ParameterKind::Question { .. } => "question",
                };
                format!("{}:{kind}", p.name)
            })
            .collect();

        out.push_str(&format!("/{}", command.name));
        if !params.is_empty() {
            out.push_str(&format!(" [{}]", params.join(", ")));
        }
        if command.confirm {
            out.push_str(" (confirm)");
        }
        match &command.request {
            Some(request) => out.push_str(&format!(" -> {} {}", request.method, request.url)),
            None => out.push_str(" -> no request"),
        }
        out.push('\n');
    }
    out
}

/// Load the catalog at `path` with env overrides applied and print a summary.
pub fn run_check_command(path: &Path) -> anyhow::Result<()> {
    let config = Config::load(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    let catalog = &config.catalog;

    println!(
        "{}: {} command(s), {} broadcast destination(s)",
        path.display(),
        catalog.commands().len(),
        catalog.channels.len()
    );
    print!("{}", describe_catalog(catalog));
    if catalog.access.is_none() {
        println!("no access list: every user will be denied (use [\"*\"] to allow everyone)");
    }
    if let Some(admin) = &config.admin {
        println!("admin push surface on {}", admin.bind_addr());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_catalog() {
        let catalog = CommandCatalog::from_json(
            r#"{
                "requests": [
                    {
                        "command": "deploy",
                        "confirm": true,
                        "params": [
                            {"type": "inline", "name": "service"},
                            {"type": "choice", "name": "env", "options": ["a", "b"]}
                        ],
                        "request": {"method": "POST", "url": "https://ci/deploy"}
                    },
                    {"command": "noop"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            describe_catalog(&catalog),
            "/deploy [service:inline, env:choice] (confirm) -> POST https://ci/deploy\n/noop -> no request\n"
        );
    }
}
