//! CodeGenerator: builds one Rust class per non-`included` template item
//! and hands it to a [`CodeEmitter`].
//!
//! The `render` method body is built by concatenating raw statement/text/
//! expression fragments into one string and parsing the *whole* class as
//! a `syn::File` at the end, rather than assembling a structured AST
//! fragment-by-fragment: fragments like `for i in 0..3 {` are not
//! independently valid syntax, only the fully-assembled body is.

use quote::ToTokens;

use crate::block::BlockKind;
use crate::error::Error;
use crate::model::TemplateItem;

/// The generated Rust source for one template item, ready for a
/// [`crate::host::CodeEmitter`].
#[derive(Debug, Clone)]
pub struct GeneratedClass {
    pub class_name: String,
    pub source: String,
}

/// Build the generated class for `item`.
///
/// `namespace` becomes the wrapping `mod`; `default_base` is the engine's
/// default base class, used when the item has no `template inherits=`
/// override (informational only: see `DESIGN.md`, Rust has no class
/// inheritance to synthesize).
pub fn build_class(
    item: &TemplateItem,
    namespace: &str,
    default_base: Option<&str>,
    debug_line_numbers: bool,
) -> Result<GeneratedClass, Error> {
    let mod_ident = crate::model::derive_class_name(namespace);
    let class_name = item.class_name.clone();

    let mut render_buf = String::new();
    let mut member_buf = String::new();
    let mut in_member = false;

    for block in &item.blocks {
        let marker = line_marker(&block.name, block.start_line, debug_line_numbers);
        match block.kind {
            BlockKind::Directive => continue,
            BlockKind::Member => {
                in_member = !in_member;
            }
            BlockKind::Text => {
                if in_member {
                    member_buf.push_str(&marker);
                    member_buf.push_str(&comment_placeholder(&block.text));
                } else {
                    render_buf.push_str(&marker);
                    render_buf.push_str(&write_text_stmt(&block.text));
                }
            }
            BlockKind::Expression => {
                if in_member {
                    member_buf.push_str(&marker);
                    member_buf.push_str(&comment_placeholder(&block.text));
                } else {
                    render_buf.push_str(&marker);
                    render_buf.push_str(&write_expr_stmt(&block.text));
                }
            }
            BlockKind::Statement => {
                let buf = if in_member { &mut member_buf } else { &mut render_buf };
                buf.push_str(&marker);
                buf.push_str(block.text.trim_matches(|c| c == '\n' || c == '\r'));
                buf.push('\n');
            }
        }
    }

    let mut var_methods = String::new();
    let mut var_entries = Vec::new();
    let mut var_bindings = String::new();
    for (name, binding) in &item.vars {
        let ty = type_to_string(&binding.parsed);
        var_methods.push_str(&format!(
            "pub fn {name}(&self) -> {ty} {{ self.ctx.get_data::<{ty}>(\"{name}\").expect(\"var '{name}' not bound\") }}\n\
             pub fn set_{name}(&mut self, value: {ty}) {{ self.ctx.set_data(\"{name}\", value); }}\n",
        ));
        var_entries.push(format!("(\"{name}\", \"{}\")", binding.raw));
        // Bound before `ctx` borrows `self.ctx` mutably, so the accessor's
        // `&self` call and the render-time `&mut self.ctx` never overlap.
        var_bindings.push_str(&format!("let {name} = self.{name}();\n"));
    }
    let vars_fn = format!(
        "pub fn vars() -> Vec<(&'static str, &'static str)> {{ vec![{}] }}\n",
        var_entries.join(", ")
    );

    let imports_src: String = item.imports.iter().map(|p| format!("use {p};\n")).collect();

    let base = item.base_class_name.as_deref().or(default_base);
    let base_comment = match base {
        Some(b) => format!("// base_class_name: {b} (composition via RenderContext; see DESIGN.md)\n"),
        None => String::new(),
    };

    let source = format!(
        "pub mod {mod_ident} {{\n\
         use t4engine::{{RenderContext, TemplateRuntime, Error}};\n\
         {imports_src}\
         {base_comment}\
         #[derive(Default)]\n\
         pub struct {class_name} {{\n    pub ctx: RenderContext,\n}}\n\
         impl {class_name} {{\n{var_methods}{vars_fn}{member_buf}}}\n\
         impl TemplateRuntime for {class_name} {{\n\
         fn context_mut(&mut self) -> &mut RenderContext {{ &mut self.ctx }}\n\
         fn render(&mut self) -> Result<String, Error> {{\n\
         {var_bindings}let ctx = &mut self.ctx;\n{render_buf}Ok(ctx.output.clone())\n}}\n}}\n}}\n",
    );

    Ok(GeneratedClass { class_name, source })
}

fn type_to_string(ty: &syn::Type) -> String {
    let mut tokens = proc_macro2::TokenStream::new();
    ty.to_tokens(&mut tokens);
    tokens.to_string()
}

fn line_marker(name: &str, line: usize, enabled: bool) -> String {
    if enabled {
        format!("// t4engine:line {name}:{line}\n")
    } else {
        String::new()
    }
}

/// Quote `text` as a Rust raw string literal, choosing enough `#`s to
/// avoid colliding with any `#`-run already in the text.
fn write_text_stmt(text: &str) -> String {
    let mut max_run = 0usize;
    let mut run = 0usize;
    for c in text.chars() {
        if c == '#' {
            run += 1;
            max_run = max_run.max(run);
        } else {
            run = 0;
        }
    }
    let sharps = "#".repeat(max_run + 1);
    format!("ctx.write(r{sharps}\"{text}\"{sharps});\n")
}

fn write_expr_stmt(expr: &str) -> String {
    format!("ctx.write({});\n", expr.trim())
}

/// Rust has no statement position inside `impl` item lists, so a bare
/// `Text`/`Expression` encountered *inside* a member region (an unusual
/// pattern: members are normally whole function items) cannot become a
/// live `ctx.write(...)` call there. It is preserved as a doc comment so
/// the member region still parses. This is a simplification, not a
/// faithful translation; see "Member-region Text/Expression" in
/// `DESIGN.md`.
fn comment_placeholder(text: &str) -> String {
    format!("// member-region literal: {:?}\n", text)
}
