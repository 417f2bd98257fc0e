use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "^",
        };
        f.write_str(symbol)
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A free variable; dotted names (`stats.total`) are one identifier
    Ident(String),
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Ident(_) => Vec::new(),
            Expr::List(items) => items.iter().collect(),
            Expr::Unary { expr, .. } => vec![&**expr],
            Expr::Binary { lhs, rhs, .. } => vec![&**lhs, &**rhs],
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => vec![&**cond, &**then, &**otherwise],
            Expr::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Iterative pre-order walk, safe on arbitrarily deep trees
    fn walk<'a>(&'a self, mut visit: impl FnMut(&'a Expr, usize)) {
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            visit(node, depth);
            for child in node.children().into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    /// Free identifiers read by this expression
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.walk(|node, _| {
            if let Expr::Ident(name) = node {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Names of every function called
    pub fn functions(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.walk(|node, _| {
            if let Expr::Call { name, .. } = node {
                names.insert(name.clone());
            }
        });
        names
    }

    pub fn depth(&self) -> usize {
        let mut max = 0;
        self.walk(|_, depth| max = max.max(depth));
        max
    }
}
