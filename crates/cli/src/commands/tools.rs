//! `toolflow tools`: List registered tools.

use std::path::Path;

pub fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let filters = super::filter_manager(&config)?;
    let registry = filters.registry();

    println!("Registered tools ({}):", registry.len());
    for spec in registry.list() {
        let tags: Vec<&str> = spec.tags.iter().map(String::as_str).collect();
        println!("  {:<14} priority {:>3}  [{}]", spec.name, spec.priority, tags.join(", "));
        println!("  {:<14} {}", "", spec.description);
        for param in &spec.parameters {
            let required = if param.required { "required" } else { "optional" };
            println!("  {:<14}   - {} ({}, {required})", "", param.name, param.param_type);
        }
    }

    Ok(())
}
