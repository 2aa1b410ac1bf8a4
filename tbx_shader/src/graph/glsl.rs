use super::*;

impl Graph {
    /// Convert each node to a GLSL assignment statement.
    pub fn to_glsl(&self) -> String {
        self.nodes.iter().map(|n| self.node_to_glsl(n)).collect()
    }

    pub fn node_to_glsl(&self, node: &Node) -> String {
        format!(
            "{}{} = {};\n",
            node.output.name,
            channel_display(node.output.channel),
            self.expr_to_glsl(&node.input)
        )
    }

    pub fn expr_to_glsl(&self, input: &Expr) -> String {
        match input {
            Expr::Node {
                node_index,
                channel,
            } => format!(
                "{}{}",
                self.nodes[*node_index].output.name,
                channel_display(*channel)
            ),
            Expr::Float(f) => float_glsl(*f),
            Expr::Int(i) => i.to_string(),
            Expr::Parameter {
                name,
                field,
                index,
                channel,
            } => {
                let field = field.as_ref().map(|f| format!(".{f}")).unwrap_or_default();
                let index = index
                    .as_ref()
                    .map(|i| format!("[{}]", self.expr_to_glsl(i)))
                    .unwrap_or_default();
                format!("{name}{field}{index}{}", channel_display(*channel))
            }
            Expr::Global { name, channel } => format!("{name}{}", channel_display(*channel)),
            Expr::Unary(op, a) => match op {
                UnaryOp::Negate => format!("-{}", self.operand_glsl(a)),
            },
            Expr::Binary(op, a, b) => {
                let op = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                };
                format!("{} {op} {}", self.operand_glsl(a), self.operand_glsl(b))
            }
            Expr::Func {
                name,
                args,
                channel,
            } => {
                let args: Vec<_> = args.iter().map(|a| self.expr_to_glsl(a)).collect();
                format!("{name}({}){}", args.join(", "), channel_display(*channel))
            }
        }
    }

    fn operand_glsl(&self, expr: &Expr) -> String {
        // Operators are always grouped explicitly to preserve evaluation order.
        match expr {
            Expr::Binary(..) | Expr::Unary(..) => format!("({})", self.expr_to_glsl(expr)),
            _ => self.expr_to_glsl(expr),
        }
    }
}

fn channel_display(channel: Option<char>) -> String {
    channel.map(|c| format!(".{c}")).unwrap_or_default()
}

fn float_glsl(f: f32) -> String {
    // Debug formatting always includes a decimal point like "1.0".
    format!("{f:?}")
}
