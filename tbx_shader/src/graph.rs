//! A directed graph of scalar shader assignments.
//!
//! Decoded instructions write each destination channel as a separate [Node].
//! Reads of previously written values reference the assigning node,
//! so the graph can be analyzed without reparsing the generated GLSL.
pub mod glsl;

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
}

/// A single assignment statement of the form `output = input;`.
#[derive(Debug, PartialEq, Clone)]
pub struct Node {
    pub output: Output,
    /// The value assigned in this assignment statement.
    pub input: Expr,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    /// A value assigned in a previous node.
    Node {
        node_index: usize,
        channel: Option<char>,
    },
    /// A float constant like `1.0`.
    Float(f32),
    /// An integer constant like `-1`.
    Int(i32),
    /// A parameter access like `name.field[index].x`, `name[index].x`, or `name.field.x`.
    Parameter {
        name: String,
        field: Option<String>,
        index: Option<Box<Expr>>,
        channel: Option<char>,
    },
    /// A global identifier like `in_attr0.x`.
    Global {
        name: String,
        channel: Option<char>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Func {
        name: String,
        args: Vec<Expr>,
        channel: Option<char>,
    },
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOp {
    Negate,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, PartialEq, Clone, Eq, PartialOrd, Ord)]
pub struct Output {
    /// The name of the output variable like `out` in `out.x = in`
    pub name: String,
    /// The channel to assign to like `x` in `out.x = in`.
    pub channel: Option<char>,
}

impl Graph {
    /// The index of the most recent assignment to `name` and `channel`.
    pub fn last_assignment(&self, name: &str, channel: Option<char>) -> Option<usize> {
        self.nodes
            .iter()
            .rposition(|n| n.output.name == name && n.output.channel == channel)
    }

    /// Flatten the inputs for all nodes.
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.nodes.iter().flat_map(|n| n.input.exprs_recursive())
    }
}

impl Expr {
    /// Flatten all expressions recursively.
    pub fn exprs_recursive(&self) -> Vec<&Expr> {
        let mut exprs = Vec::new();
        add_exprs(&mut exprs, self);
        exprs
    }
}

fn add_exprs<'a>(exprs: &mut Vec<&'a Expr>, input: &'a Expr) {
    exprs.push(input);
    match input {
        Expr::Node { .. } => (),
        Expr::Float(_) => (),
        Expr::Int(_) => (),
        Expr::Parameter { index, .. } => {
            if let Some(index) = index {
                add_exprs(exprs, index);
            }
        }
        Expr::Global { .. } => (),
        Expr::Unary(_, a) => {
            add_exprs(exprs, a);
        }
        Expr::Binary(_, lh, rh) => {
            add_exprs(exprs, lh);
            add_exprs(exprs, rh);
        }
        Expr::Func { args, .. } => {
            for arg in args {
                add_exprs(exprs, arg);
            }
        }
    }
}
