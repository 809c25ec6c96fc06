//! Text form of a host image.
//!
//! ```text
//! .class Game.Player
//!   .field int Health
//! .end
//!
//! .extern static void Game.Log::Write(string)
//!
//! .method static int Game.Combat::Damage(Game.Player, int)
//!   .locals int
//!   ldarg 1
//!   brfalse zero
//!   ldarg 1
//!   ret
//! zero:
//!   ldc 0
//!   ret
//! .end
//! ```
//!
//! Comments start with `#`. Labels are `name:` prefixes attached to the next instruction.
//! `.try <start> <end> <handler> <handler_end> catch <Type>|finally` declares an exception
//! region from label names; `@end` names the position past the last instruction.
//!
//! Printing is canonical: labels are renamed `L0, L1, ...` by position, so equivalent bodies
//! print identically regardless of how their labels were numbered.

use crate::body::{ExceptionRegion, HandlerKind, Host, MethodBody};
use crate::instruction::{Instruction, Label, Operand};
use crate::opcode::{OperandKind, Opcode};
use crate::result::{Error, Result};
use crate::symbols::{MethodDef, MethodId, SymbolTable};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write;

const END_OF_BODY: &str = "@end";

#[derive(Clone, Debug)]
struct Line {
    number: usize,
    text: String,
    raw: String,
}

impl Line {
    fn error(&self, msg: impl Into<String>) -> Error {
        Error::ParseError {
            line: self.number,
            msg: msg.into(),
            raw: self.raw.clone(),
        }
    }
}

struct PendingBody {
    method: MethodId,
    header: Line,
    lines: Vec<Line>,
}

/// Parses a complete host image.
pub fn parse_host(text: &str) -> Result<Host> {
    let lines = lex(text);
    if lines.is_empty() {
        return Err(Error::ParseError {
            line: 0,
            msg: "empty host image".into(),
            raw: String::new(),
        });
    }

    let mut symbols = SymbolTable::new();
    let mut pending = Vec::new();
    let mut defined = HashSet::new();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        let (directive, rest) = split_first(&line.text);
        match directive {
            ".class" => {
                if rest.is_empty() {
                    return Err(line.error("missing class name"));
                }
                let owner = symbols.intern_type(rest);
                i += 1;
                loop {
                    let member = lines
                        .get(i)
                        .ok_or_else(|| line.error("unterminated .class"))?;
                    if member.text == ".end" {
                        break;
                    }
                    let (directive, rest) = split_first(&member.text);
                    if directive != ".field" {
                        return Err(member.error("expected .field or .end"));
                    }
                    let (is_static, rest) = strip_static(rest);
                    let (ty, name) = split_first(rest);
                    if ty.is_empty() || name.is_empty() || name.contains(char::is_whitespace) {
                        return Err(member.error("expected `.field [static] <type> <name>`"));
                    }
                    let ty = symbols.intern_type(ty);
                    symbols
                        .declare_field(owner, name, ty, is_static)
                        .map_err(|e| member.error(e.to_string()))?;
                    i += 1;
                }
                i += 1;
            }
            ".extern" => {
                parse_signature(rest, &mut symbols).map_err(|msg| line.error(msg))?;
                i += 1;
            }
            ".method" => {
                let method = parse_signature(rest, &mut symbols).map_err(|msg| line.error(msg))?;
                if !defined.insert(method) {
                    return Err(line.error("method body defined twice"));
                }
                let header = line.clone();
                let mut body_lines = Vec::new();
                i += 1;
                loop {
                    let body_line = lines
                        .get(i)
                        .ok_or_else(|| header.error("unterminated .method"))?;
                    if body_line.text == ".end" {
                        break;
                    }
                    body_lines.push(body_line.clone());
                    i += 1;
                }
                pending.push(PendingBody {
                    method,
                    header,
                    lines: body_lines,
                });
                i += 1;
            }
            _ => return Err(line.error("expected .class, .extern or .method")),
        }
    }

    let mut host = Host::new(symbols);
    for body in &pending {
        let parsed = parse_body(body, &mut host.symbols)?;
        host.replace_body(parsed)?;
    }
    tracing::debug!(
        "Parsed host image: {} methods, {} bodies",
        host.symbols.methods().count(),
        pending.len()
    );
    Ok(host)
}

fn lex(text: &str) -> Vec<Line> {
    text.lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let stripped = strip_comment(raw).trim();
            (!stripped.is_empty()).then(|| Line {
                number: index + 1,
                text: stripped.to_string(),
                raw: raw.to_string(),
            })
        })
        .collect()
}

fn strip_comment(raw: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (index, c) in raw.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &raw[..index],
            _ => {}
        }
    }
    raw
}

fn split_first(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    }
}

fn strip_static(text: &str) -> (bool, &str) {
    match split_first(text) {
        ("static", rest) => (true, rest),
        _ => (false, text),
    }
}

/// Parses `[static] <ret|void> Owner::Name(P1, P2)` and declares the method.
fn parse_signature(text: &str, symbols: &mut SymbolTable) -> std::result::Result<MethodId, String> {
    let (is_static, rest) = strip_static(text);
    let (ret, identity) = split_first(rest);
    if ret.is_empty() || identity.is_empty() {
        return Err("expected `[static] <ret> Owner::Name(params)`".into());
    }
    let open = identity.find('(').ok_or("missing parameter list")?;
    let params = identity[open + 1..]
        .strip_suffix(')')
        .ok_or("unterminated parameter list")?;
    let (owner, name) = identity[..open]
        .rsplit_once("::")
        .ok_or("expected Owner::Name")?;
    if owner.is_empty() || name.is_empty() {
        return Err("expected Owner::Name".into());
    }
    let owner = symbols.intern_type(owner);
    let params = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| symbols.intern_type(p))
        .collect();
    let ret = (ret != "void").then(|| symbols.intern_type(ret));
    symbols
        .declare_method(MethodDef {
            owner,
            name: name.to_string(),
            params,
            ret,
            is_static,
        })
        .map_err(|e| e.to_string())
}

struct RawInstruction<'a> {
    opcode: Opcode,
    operand: &'a str,
    line: &'a Line,
}

struct RawRegion<'a> {
    bounds: [&'a str; 4],
    kind: &'a str,
    catch_type: Option<&'a str>,
    line: &'a Line,
}

fn parse_body(pending: &PendingBody, symbols: &mut SymbolTable) -> Result<MethodBody> {
    let mut locals = Vec::new();
    let mut label_defs: HashMap<String, usize> = HashMap::new();
    let mut raw_instructions: Vec<RawInstruction<'_>> = Vec::new();
    let mut raw_regions = Vec::new();

    for line in &pending.lines {
        let mut text = line.text.as_str();
        loop {
            let (first, rest) = split_first(text);
            let Some(name) = first.strip_suffix(':') else {
                break;
            };
            if name.is_empty() || name.contains(':') || name == END_OF_BODY {
                return Err(line.error("invalid label name"));
            }
            if label_defs
                .insert(name.to_string(), raw_instructions.len())
                .is_some()
            {
                return Err(line.error(format!("label `{name}` defined twice")));
            }
            text = rest;
        }
        if text.is_empty() {
            continue;
        }

        let (head, rest) = split_first(text);
        match head {
            ".locals" => {
                for ty in rest
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|t| !t.is_empty())
                {
                    locals.push(symbols.intern_type(ty));
                }
            }
            ".try" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                let region = match parts.as_slice() {
                    [a, b, c, d, "finally"] => RawRegion {
                        bounds: [*a, *b, *c, *d],
                        kind: "finally",
                        catch_type: None,
                        line,
                    },
                    [a, b, c, d, "catch", ty] => RawRegion {
                        bounds: [*a, *b, *c, *d],
                        kind: "catch",
                        catch_type: Some(*ty),
                        line,
                    },
                    _ => {
                        return Err(line.error(
                            "expected `.try <start> <end> <handler> <handler_end> catch <Type>|finally`",
                        ));
                    }
                };
                raw_regions.push(region);
            }
            _ => {
                let opcode: Opcode = head.parse().map_err(|msg: String| line.error(msg))?;
                raw_instructions.push(RawInstruction {
                    opcode,
                    operand: rest,
                    line,
                });
            }
        }
    }

    let len = raw_instructions.len();
    if let Some((name, _)) = label_defs.iter().find(|(_, index)| **index >= len) {
        return Err(pending
            .header
            .error(format!("label `{name}` does not precede an instruction")));
    }

    // Allocate labels only for names that branches reference, ordered by position.
    let mut referenced: Vec<(usize, &str)> = Vec::new();
    for raw in raw_instructions.iter().filter(|r| r.opcode.is_branch()) {
        let index = label_defs
            .get(raw.operand)
            .ok_or_else(|| raw.line.error(format!("undefined label `{}`", raw.operand)))?;
        if !referenced.iter().any(|(_, name)| *name == raw.operand) {
            referenced.push((*index, raw.operand));
        }
    }
    referenced.sort();

    let mut body = MethodBody::new(pending.method);
    let mut labels: HashMap<&str, (Label, usize)> = HashMap::new();
    for (index, name) in &referenced {
        labels.insert(*name, (body.define_label(), *index));
    }

    for raw in &raw_instructions {
        let operand = parse_operand(raw, &labels, symbols)?;
        body.instructions.push(Instruction::new(raw.opcode, operand));
    }
    for (index, name) in &referenced {
        let (label, _) = labels[*name];
        body.instructions[*index].labels.push(label);
    }

    body.locals = locals;
    for raw in &raw_regions {
        let mut bounds = [0usize; 4];
        for (slot, name) in bounds.iter_mut().zip(raw.bounds) {
            *slot = if name == END_OF_BODY {
                len
            } else {
                *label_defs
                    .get(name)
                    .ok_or_else(|| raw.line.error(format!("undefined label `{name}`")))?
            };
        }
        let kind = match (raw.kind, raw.catch_type) {
            ("catch", Some(ty)) => HandlerKind::Catch(symbols.intern_type(ty)),
            _ => HandlerKind::Finally,
        };
        body.regions.push(ExceptionRegion {
            kind,
            try_start: bounds[0],
            try_end: bounds[1],
            handler_start: bounds[2],
            handler_end: bounds[3],
        });
    }
    Ok(body)
}

fn parse_operand(
    raw: &RawInstruction<'_>,
    labels: &HashMap<&str, (Label, usize)>,
    symbols: &mut SymbolTable,
) -> Result<Operand> {
    let text = raw.operand;
    let kind = raw.opcode.operand_kind();
    if kind == OperandKind::None {
        if !text.is_empty() {
            return Err(raw.line.error(format!("{} takes no operand", raw.opcode)));
        }
        return Ok(Operand::None);
    }
    if text.is_empty() {
        return Err(raw.line.error(format!("{} requires an operand", raw.opcode)));
    }
    let operand = match kind {
        OperandKind::None => Operand::None,
        OperandKind::Int => Operand::Int(
            parse_int(text).ok_or_else(|| raw.line.error(format!("invalid integer `{text}`")))?,
        ),
        OperandKind::Str => Operand::Str(
            parse_string(text).ok_or_else(|| raw.line.error("invalid string literal"))?,
        ),
        OperandKind::Arg => Operand::Arg(
            text.parse()
                .map_err(|_| raw.line.error(format!("invalid argument index `{text}`")))?,
        ),
        OperandKind::Local => Operand::Local(
            text.parse()
                .map_err(|_| raw.line.error(format!("invalid local index `{text}`")))?,
        ),
        OperandKind::Label => Operand::Label(
            labels
                .get(text)
                .map(|(label, _)| *label)
                .ok_or_else(|| raw.line.error(format!("undefined label `{text}`")))?,
        ),
        OperandKind::Field => Operand::Field(
            symbols
                .field_id(text)
                .ok_or_else(|| raw.line.error(format!("unknown field `{text}`")))?,
        ),
        OperandKind::Method => Operand::Method(
            symbols
                .method_id(text)
                .ok_or_else(|| raw.line.error(format!("unknown method `{text}`")))?,
        ),
        OperandKind::Type => Operand::Type(symbols.intern_type(text)),
    };
    Ok(operand)
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some(if negative { -value } else { value })
}

fn parse_string(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }
    Some(out)
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `[static] <ret> Owner::Name(P1, P2)` header of a method.
pub fn signature(symbols: &SymbolTable, method: MethodId) -> String {
    let Ok(def) = symbols.method(method) else {
        return symbols.method_name(method);
    };
    let ret = def.ret.map_or("void", |ty| symbols.type_name(ty));
    format!(
        "{}{} {}",
        if def.is_static { "static " } else { "" },
        ret,
        symbols.method_name(method)
    )
}

/// Renders one instruction with raw label names, for diagnostics.
pub fn render_instruction(ins: &Instruction, symbols: &SymbolTable) -> String {
    render(ins, symbols, &|label| label.to_string())
}

fn render(ins: &Instruction, symbols: &SymbolTable, label_name: &dyn Fn(Label) -> String) -> String {
    let operand = match &ins.operand {
        Operand::None => return ins.opcode.mnemonic().to_string(),
        Operand::Int(v) => v.to_string(),
        Operand::Str(s) => quote(s),
        Operand::Arg(i) | Operand::Local(i) => i.to_string(),
        Operand::Label(label) => label_name(*label),
        Operand::Field(field) => symbols.field_name(*field),
        Operand::Method(method) => symbols.method_name(*method),
        Operand::Type(ty) => symbols.type_name(*ty).to_string(),
    };
    format!("{} {}", ins.opcode.mnemonic(), operand)
}

/// Canonical text of one method body, including its `.method` header.
pub fn print_body(body: &MethodBody, symbols: &SymbolTable) -> String {
    let mut ranked: Vec<(usize, Label)> = body
        .instructions
        .iter()
        .enumerate()
        .flat_map(|(index, ins)| ins.labels.iter().map(move |label| (index, *label)))
        .collect();
    ranked.sort();
    let names: HashMap<Label, String> = ranked
        .iter()
        .enumerate()
        .map(|(rank, (_, label))| (*label, format!("L{rank}")))
        .collect();
    let label_name = |label: Label| {
        names
            .get(&label)
            .cloned()
            .unwrap_or_else(|| format!("{label}?"))
    };

    let len = body.len();
    let mut markers: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (index, label) in &ranked {
        markers.entry(*index).or_default().push(label_name(*label));
    }
    let mut region_lines = Vec::new();
    for (r, region) in body.regions.iter().enumerate() {
        let bounds = [
            (region.try_start, "try"),
            (region.try_end, "end"),
            (region.handler_start, "handler"),
            (region.handler_end, "done"),
        ];
        let mut names = Vec::with_capacity(4);
        for (index, suffix) in bounds {
            if index >= len {
                names.push(END_OF_BODY.to_string());
            } else {
                let name = format!("r{r}.{suffix}");
                markers.entry(index).or_default().push(name.clone());
                names.push(name);
            }
        }
        let kind = match region.kind {
            HandlerKind::Catch(ty) => format!("catch {}", symbols.type_name(ty)),
            HandlerKind::Finally => "finally".to_string(),
        };
        region_lines.push(format!("  .try {} {kind}", names.join(" ")));
    }

    let mut out = String::new();
    let _ = writeln!(out, ".method {}", signature(symbols, body.method));
    if !body.locals.is_empty() {
        let locals: Vec<&str> = body.locals.iter().map(|t| symbols.type_name(*t)).collect();
        let _ = writeln!(out, "  .locals {}", locals.join(" "));
    }
    for (index, ins) in body.instructions.iter().enumerate() {
        if let Some(names) = markers.get(&index) {
            for name in names {
                let _ = writeln!(out, "{name}:");
            }
        }
        let _ = writeln!(out, "  {}", render(ins, symbols, &label_name));
    }
    for line in region_lines {
        let _ = writeln!(out, "{line}");
    }
    out.push_str(".end\n");
    out
}

/// Canonical text of a whole host image.
pub fn print_host(host: &Host) -> String {
    let symbols = &host.symbols;
    let mut out = String::new();
    for (_, ty) in symbols.types().filter(|(_, t)| !t.fields.is_empty()) {
        let _ = writeln!(out, ".class {}", ty.name);
        for field in &ty.fields {
            if let Ok(def) = symbols.field(*field) {
                let _ = writeln!(
                    out,
                    "  .field {}{} {}",
                    if def.is_static { "static " } else { "" },
                    symbols.type_name(def.ty),
                    def.name
                );
            }
        }
        out.push_str(".end\n\n");
    }
    let mut externs = false;
    for (id, _) in symbols.methods() {
        if host.body(id).is_none() {
            let _ = writeln!(out, ".extern {}", signature(symbols, id));
            externs = true;
        }
    }
    if externs {
        out.push('\n');
    }
    for body in host.bodies() {
        out.push_str(&print_body(body, symbols));
        out.push('\n');
    }
    out
}
