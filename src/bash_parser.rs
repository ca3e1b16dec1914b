use anyhow::{anyhow, Result};
use serde::Serialize;
use tree_sitter::{Node, Parser, TreeCursor};

/// Node kinds that would let text outside a quoted argument run as shell syntax.
const ACTIVE_KINDS: &[&str] = &[
    "command_substitution",
    "process_substitution",
    "expansion",
    "simple_expansion",
    "arithmetic_expansion",
    "file_redirect",
    "heredoc_redirect",
    "herestring_redirect",
    "redirected_statement",
    "pipeline",
    "list",
    "subshell",
    "variable_assignment",
];

#[derive(Debug, Serialize)]
pub struct AstNode {
    pub kind: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub children: Vec<AstNode>,
}

/// Verdict for a rendered command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineCheck {
    pub statements: usize,
    pub argument_count: usize,
    pub has_error: bool,
    pub active_nodes: Vec<String>,
}

impl LineCheck {
    /// One plain command whose arguments are all inert words.
    pub fn is_literal(&self) -> bool {
        self.statements == 1 && !self.has_error && self.active_nodes.is_empty()
    }
}

pub struct BashParser {
    parser: Parser,
}

impl BashParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let lang = tree_sitter_bash::language();
        parser
            .set_language(&lang)
            .map_err(|e| anyhow!("load bash grammar: {}", e))?;
        Ok(Self { parser })
    }

    pub fn parse_to_tree(&mut self, source: &str) -> Option<tree_sitter::Tree> {
        self.parser.parse(source, None)
    }

    pub fn parse_to_ast(&mut self, source: &str) -> Result<AstNode> {
        let tree = self
            .parse_to_tree(source)
            .ok_or_else(|| anyhow!("could not parse command line"))?;
        Ok(build_node_recursive(tree.root_node()))
    }

    /// Parses `source` with the bash grammar and reports whether every
    /// argument stayed a single literal word.
    pub fn check_command_line(&mut self, source: &str) -> Result<LineCheck> {
        let tree = self
            .parse_to_tree(source)
            .ok_or_else(|| anyhow!("could not parse command line"))?;
        let root = tree.root_node();

        let mut active_nodes = Vec::new();
        collect_active(root, &mut active_nodes);

        let mut argument_count = 0;
        if root.named_child_count() == 1 {
            if let Some(command) = root.named_child(0).filter(|n| n.kind() == "command") {
                let mut cursor = command.walk();
                argument_count = command
                    .children_by_field_name("argument", &mut cursor)
                    .count();
            }
        }

        Ok(LineCheck {
            statements: root.named_child_count(),
            argument_count,
            has_error: root.has_error(),
            active_nodes,
        })
    }
}

fn collect_active(node: Node, found: &mut Vec<String>) {
    if ACTIVE_KINDS.contains(&node.kind()) {
        found.push(node.kind().to_string());
    }
    let mut cursor: TreeCursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_active(child, found);
    }
}

fn build_node_recursive(node: Node) -> AstNode {
    let mut cursor: TreeCursor = node.walk();
    let mut children = Vec::new();
    for child in node.children(&mut cursor) {
        children.push(build_node_recursive(child));
    }
    AstNode {
        kind: node.kind().to_string(),
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        children,
    }
}

/// One node per line; indentation denotes depth.
pub fn ast_outline(ast: &AstNode, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent * 2);
    let _ = std::fmt::Write::write_fmt(
        out,
        format_args!("{}{} [{}..{}]\n", pad, ast.kind, ast.start_byte, ast.end_byte),
    );
    for ch in &ast.children {
        ast_outline(ch, indent + 1, out);
    }
}
