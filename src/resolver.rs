//! DirectiveResolver: walks every top-level item's blocks,
//! expanding `include`s (with cycle detection) and applying `template` /
//! `assembly` / `import` / `var` directives in place.

use crate::block::{lex, Block, BlockKind};
use crate::directive::{self, Directive};
use crate::error::Error;
use crate::host::SourceLoader;
use crate::model::{Bundle, TemplateItem};
use crate::types;

/// Run the resolver over every item currently in `bundle`. New items
/// created by `include` are appended to `bundle.templates` and processed
/// in their own turn (the loop re-reads the length each pass).
pub fn process(bundle: &mut Bundle, loader: &dyn SourceLoader) -> Result<(), Error> {
    for item in &mut bundle.templates {
        if item.blocks.is_empty() && !item.content.is_empty() {
            item.blocks = lex(&item.name, &item.content)?;
        }
    }

    let mut idx = 0;
    while idx < bundle.templates.len() {
        process_item(bundle, idx, loader)?;
        idx += 1;
    }
    Ok(())
}

fn process_item(bundle: &mut Bundle, idx: usize, loader: &dyn SourceLoader) -> Result<(), Error> {
    let top_name = bundle.templates[idx].name.clone();
    let mut stack: Vec<String> = vec![top_name];
    let mut i = 0;

    loop {
        let len = bundle.templates[idx].blocks.len();
        if i >= len {
            break;
        }
        let block = bundle.templates[idx].blocks[i].clone();

        unwind_stack(&mut stack, &block.name);

        if block.kind == BlockKind::Directive {
            let dir = directive::parse(&block.name, block.start_line, &block.text)?;
            apply_directive(bundle, idx, i, &block, &dir, &mut stack, loader)?;
        }

        i += 1;
    }

    Ok(())
}

/// Pop the expansion stack until its top matches `name`, reflecting return
/// from a nested include.
fn unwind_stack(stack: &mut Vec<String>, name: &str) {
    while stack.len() > 1 && !stack.last().map(|s| s.eq_ignore_ascii_case(name)).unwrap_or(false) {
        stack.pop();
    }
}

fn apply_directive(
    bundle: &mut Bundle,
    idx: usize,
    block_pos: usize,
    block: &Block,
    dir: &Directive,
    stack: &mut Vec<String>,
    loader: &dyn SourceLoader,
) -> Result<(), Error> {
    match dir.name.as_str() {
        "template" => {
            if bundle.templates[idx].processed {
                return Err(Error::Directive {
                    name: block.name.clone(),
                    line: block.start_line,
                    reason: "duplicate 'template' directive on the same item".to_string(),
                });
            }
            if let Some(name) = dir.param("name") {
                bundle.templates[idx].class_name = name.to_string();
            }
            if let Some(inherits) = dir.param("inherits") {
                bundle.templates[idx].base_class_name = Some(inherits.to_string());
            }
            bundle.templates[idx].processed = true;
        }
        "assembly" => {
            let name = dir.require("name").map_err(|reason| Error::Directive {
                name: block.name.clone(),
                line: block.start_line,
                reason,
            })?;
            bundle.assembly_references.insert(name.to_string());
        }
        "import" => {
            let namespace = dir.require("namespace").map_err(|reason| Error::Directive {
                name: block.name.clone(),
                line: block.start_line,
                reason,
            })?;
            bundle.templates[idx].imports.insert(namespace.to_string());
        }
        "var" => {
            apply_var(bundle, idx, block, dir)?;
        }
        "include" => {
            apply_include(bundle, idx, block_pos, block, dir, stack, loader)?;
        }
        other => {
            return Err(Error::Directive {
                name: block.name.clone(),
                line: block.start_line,
                reason: format!("unknown directive '{other}'"),
            });
        }
    }
    Ok(())
}

fn apply_var(bundle: &mut Bundle, idx: usize, block: &Block, dir: &Directive) -> Result<(), Error> {
    let name = dir.require("name").map_err(|reason| Error::Directive {
        name: block.name.clone(),
        line: block.start_line,
        reason,
    })?;
    let type_name = dir.require("type").map_err(|reason| Error::Directive {
        name: block.name.clone(),
        line: block.start_line,
        reason,
    })?;

    if bundle.templates[idx].vars.contains_key(name) {
        return Err(Error::Directive {
            name: block.name.clone(),
            line: block.start_line,
            reason: format!("duplicate var '{name}'"),
        });
    }

    let (binding, leading_idents) = types::resolve(name, type_name)?;
    for ident in leading_idents {
        if !is_prelude_type(&ident) {
            bundle.templates[idx].imports.insert(ident.clone());
            bundle.assembly_references.insert(ident);
        }
    }
    bundle.templates[idx].vars.insert(name.to_string(), binding);
    Ok(())
}

fn is_prelude_type(ident: &str) -> bool {
    matches!(
        ident,
        "String"
            | "Vec"
            | "Option"
            | "Box"
            | "Result"
            | "bool"
            | "str"
            | "char"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "i128"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "u128"
            | "f32"
            | "f64"
            | "usize"
            | "isize"
    )
}

fn apply_include(
    bundle: &mut Bundle,
    idx: usize,
    block_pos: usize,
    block: &Block,
    dir: &Directive,
    stack: &mut Vec<String>,
    loader: &dyn SourceLoader,
) -> Result<(), Error> {
    let target_name = dir.require("name").map_err(|reason| Error::Directive {
        name: block.name.clone(),
        line: block.start_line,
        reason,
    })?.to_string();

    if let Some(pos) = stack.iter().position(|n| n.eq_ignore_ascii_case(&target_name)) {
        return Err(Error::Cycle { names: stack[pos..].to_vec() });
    }

    let target_idx = resolve_include_target(bundle, &block.name, &target_name, loader)?;
    bundle.templates[target_idx].included = true;

    if bundle.templates[target_idx].blocks.is_empty() && !bundle.templates[target_idx].content.is_empty() {
        let content = bundle.templates[target_idx].content.clone();
        let target_item_name = bundle.templates[target_idx].name.clone();
        bundle.templates[target_idx].blocks = lex(&target_item_name, &content)?;
    }

    stack.push(bundle.templates[target_idx].name.clone());

    let spliced: Vec<Block> = bundle.templates[target_idx].blocks.clone();
    bundle.templates[idx].blocks.splice(block_pos + 1..block_pos + 1, spliced);

    Ok(())
}

fn resolve_include_target(
    bundle: &mut Bundle,
    including_name: &str,
    target_name: &str,
    loader: &dyn SourceLoader,
) -> Result<usize, Error> {
    if let Some(idx) = bundle.find_by_name(target_name) {
        return Ok(idx);
    }

    let resolved_path = loader.resolve(including_name, target_name);
    if loader.exists(&resolved_path) {
        let content = loader.read(&resolved_path)?;
        let mut item = TemplateItem::new(target_name, &content);
        item.blocks = lex(target_name, &content)?;
        bundle.templates.push(item);
        return Ok(bundle.templates.len() - 1);
    }

    Err(Error::Directive {
        name: including_name.to_string(),
        line: 0,
        reason: format!("cannot resolve include '{target_name}'"),
    })
}
