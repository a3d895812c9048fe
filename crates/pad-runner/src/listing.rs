//! `padscript commands` output

use std::fmt::Write;

use pad_script::CommandRegistry;

/// Commands grouped by purpose, one line each
///
/// Commands that the code exporter cannot translate are marked with `*`.
pub fn render(registry: &CommandRegistry) -> String {
    let width = registry.iter().map(|spec| spec.name.len()).max().unwrap_or(0);
    let mut out = String::new();

    for (group, specs) in registry.grouped() {
        let _ = writeln!(out, "{group}");
        for spec in specs {
            let marker = if spec.exportable { ' ' } else { '*' };
            let keys = spec.required_keys.join(", ");
            let _ = writeln!(
                out,
                "  {marker} {name:<width$}  {doc}{keys}",
                name = spec.name,
                doc = spec.doc,
                keys = if keys.is_empty() {
                    String::new()
                } else {
                    format!(" [{keys}]")
                },
            );
        }
        out.push('\n');
    }
    out.push_str("* not exportable\n");
    out
}
