//! Tagged-variant AST for the accepted JavaScript subset
//!
//! Node kinds carry their canonical names so compile errors read the same
//! way transports already expect (`ArrowFunctionExpression not allowed`).

/// Source position (1-based line, 0-based column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// AST node kind, named after the canonical grammar production
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    ExpressionStatement,
    BlockStatement,
    VariableDeclaration,
    Identifier,
    NumericLiteral,
    StringLiteral,
    BooleanLiteral,
    NullLiteral,
    ArrayExpression,
    ObjectExpression,
    ObjectProperty,
    ObjectPattern,
    ArrayPattern,
    ArrowFunctionExpression,
    FunctionExpression,
    ThisExpression,
    CallExpression,
    NewExpression,
    MemberExpression,
    AssignmentExpression,
    BinaryExpression,
    LogicalExpression,
    UnaryExpression,
    UpdateExpression,
    ConditionalExpression,
    AwaitExpression,
    ReturnStatement,
    IfStatement,
    ForStatement,
    ForOfStatement,
    WhileStatement,
    DoWhileStatement,
    BreakStatement,
    ContinueStatement,
    TryStatement,
    CatchClause,
    ThrowStatement,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Program => "Program",
            Self::ExpressionStatement => "ExpressionStatement",
            Self::BlockStatement => "BlockStatement",
            Self::VariableDeclaration => "VariableDeclaration",
            Self::Identifier => "Identifier",
            Self::NumericLiteral => "NumericLiteral",
            Self::StringLiteral => "StringLiteral",
            Self::BooleanLiteral => "BooleanLiteral",
            Self::NullLiteral => "NullLiteral",
            Self::ArrayExpression => "ArrayExpression",
            Self::ObjectExpression => "ObjectExpression",
            Self::ObjectProperty => "ObjectProperty",
            Self::ObjectPattern => "ObjectPattern",
            Self::ArrayPattern => "ArrayPattern",
            Self::ArrowFunctionExpression => "ArrowFunctionExpression",
            Self::FunctionExpression => "FunctionExpression",
            Self::ThisExpression => "ThisExpression",
            Self::CallExpression => "CallExpression",
            Self::NewExpression => "NewExpression",
            Self::MemberExpression => "MemberExpression",
            Self::AssignmentExpression => "AssignmentExpression",
            Self::BinaryExpression => "BinaryExpression",
            Self::LogicalExpression => "LogicalExpression",
            Self::UnaryExpression => "UnaryExpression",
            Self::UpdateExpression => "UpdateExpression",
            Self::ConditionalExpression => "ConditionalExpression",
            Self::AwaitExpression => "AwaitExpression",
            Self::ReturnStatement => "ReturnStatement",
            Self::IfStatement => "IfStatement",
            Self::ForStatement => "ForStatement",
            Self::ForOfStatement => "ForOfStatement",
            Self::WhileStatement => "WhileStatement",
            Self::DoWhileStatement => "DoWhileStatement",
            Self::BreakStatement => "BreakStatement",
            Self::ContinueStatement => "ContinueStatement",
            Self::TryStatement => "TryStatement",
            Self::CatchClause => "CatchClause",
            Self::ThrowStatement => "ThrowStatement",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed (and possibly instrumented) program
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
    /// Generated collision-free monitor identifier, set by instrumentation
    pub monitor_ident: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Const,
    Let,
}

impl VarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Const => "const",
            Self::Let => "let",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct VarDeclarator {
    pub pattern: Pattern,
    pub init: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub param: Option<Pattern>,
    pub body: Block,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum ForInit {
    VarDecl { kind: VarKind, declarators: Vec<VarDeclarator>, pos: Pos },
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expression { expr: Expr, pos: Pos },
    VarDecl { kind: VarKind, declarators: Vec<VarDeclarator>, pos: Pos },
    Block(Block),
    Return { arg: Option<Expr>, pos: Pos },
    If { test: Expr, consequent: Box<Stmt>, alternate: Option<Box<Stmt>>, pos: Pos },
    For { init: Option<ForInit>, test: Option<Expr>, update: Option<Expr>, body: Box<Stmt>, pos: Pos },
    ForOf { kind: VarKind, pattern: Pattern, iterable: Expr, body: Box<Stmt>, pos: Pos },
    While { test: Expr, body: Box<Stmt>, pos: Pos },
    DoWhile { body: Box<Stmt>, test: Expr, pos: Pos },
    Break { pos: Pos },
    Continue { pos: Pos },
    Try { block: Block, handler: Option<CatchClause>, finalizer: Option<Block>, pos: Pos },
    Throw { arg: Expr, pos: Pos },
    /// Injected by instrumentation: constructs the fresh runtime monitor
    MonitorInit,
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Self::Expression { pos, .. }
            | Self::VarDecl { pos, .. }
            | Self::Return { pos, .. }
            | Self::If { pos, .. }
            | Self::For { pos, .. }
            | Self::ForOf { pos, .. }
            | Self::While { pos, .. }
            | Self::DoWhile { pos, .. }
            | Self::Break { pos }
            | Self::Continue { pos }
            | Self::Try { pos, .. }
            | Self::Throw { pos, .. } => *pos,
            Self::Block(block) => block.pos,
            Self::MonitorInit => Pos::default(),
        }
    }
}

/// Property key in object literals and destructuring patterns
#[derive(Debug, Clone)]
pub enum PropKey {
    Ident(String),
    Str(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct ObjectProp {
    pub key: PropKey,
    pub value: Expr,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct ObjectPatternProp {
    pub key: PropKey,
    pub value: Pattern,
    pub pos: Pos,
}

/// Binding pattern (declarations, parameters, catch clauses)
#[derive(Debug, Clone)]
pub enum Pattern {
    Ident { name: String, pos: Pos },
    Object { props: Vec<ObjectPatternProp>, pos: Pos },
    Array { elements: Vec<Option<Pattern>>, pos: Pos },
}

impl Pattern {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Ident { .. } => NodeKind::Identifier,
            Self::Object { .. } => NodeKind::ObjectPattern,
            Self::Array { .. } => NodeKind::ArrayPattern,
        }
    }

    pub fn pos(&self) -> Pos {
        match self {
            Self::Ident { pos, .. } | Self::Object { pos, .. } | Self::Array { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArrowBody {
    Block(Block),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct ArrowFunction {
    pub is_async: bool,
    pub params: Vec<Pattern>,
    pub body: ArrowBody,
    /// Source length in characters, used for worst-case size estimates
    pub src_len: usize,
    pub pos: Pos,
}

/// Property accessor of a member expression
#[derive(Debug, Clone)]
pub enum PropAccess {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
            Self::Mod => "%=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    EqEq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::StrictEq => "===",
            Self::StrictNotEq => "!==",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Nullish => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Not,
    TypeOf,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minus => "-",
            Self::Not => "!",
            Self::TypeOf => "typeof",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Inc,
    Dec,
}

impl UpdateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inc => "++",
            Self::Dec => "--",
        }
    }
}

/// Assignment target (plain identifier or member expression)
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Ident { name: String, pos: Pos },
    Member { object: Expr, property: PropAccess, pos: Pos },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Ident { name: String, pos: Pos },
    Number { value: f64, pos: Pos },
    Str { value: String, pos: Pos },
    Bool { value: bool, pos: Pos },
    Null { pos: Pos },
    Array { elements: Vec<Expr>, pos: Pos },
    Object { props: Vec<ObjectProp>, pos: Pos },
    Arrow(Box<ArrowFunction>),
    /// Parsed for precise diagnostics, always rejected by the subset check
    Function { is_async: bool, params: Vec<Pattern>, body: Block, pos: Pos },
    /// Parsed for precise diagnostics, always rejected by the subset check
    This { pos: Pos },
    Call { callee: Box<Expr>, args: Vec<Expr>, pos: Pos },
    New { callee: Box<Expr>, args: Vec<Expr>, pos: Pos },
    Member { object: Box<Expr>, property: Box<PropAccess>, pos: Pos },
    Assign { op: AssignOp, target: Box<AssignTarget>, value: Box<Expr>, pos: Pos },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr>, pos: Pos },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr>, pos: Pos },
    Unary { op: UnaryOp, arg: Box<Expr>, pos: Pos },
    Update { op: UpdateOp, prefix: bool, name: String, pos: Pos },
    Conditional { test: Box<Expr>, consequent: Box<Expr>, alternate: Box<Expr>, pos: Pos },
    Await { arg: Box<Expr>, pos: Pos },
    /// Injected by instrumentation: a guarded call into the runtime monitor
    Runtime(Box<RuntimeCall>),
}

impl Expr {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Ident { .. } => NodeKind::Identifier,
            Self::Number { .. } => NodeKind::NumericLiteral,
            Self::Str { .. } => NodeKind::StringLiteral,
            Self::Bool { .. } => NodeKind::BooleanLiteral,
            Self::Null { .. } => NodeKind::NullLiteral,
            Self::Array { .. } => NodeKind::ArrayExpression,
            Self::Object { .. } => NodeKind::ObjectExpression,
            Self::Arrow(_) => NodeKind::ArrowFunctionExpression,
            Self::Function { .. } => NodeKind::FunctionExpression,
            Self::This { .. } => NodeKind::ThisExpression,
            Self::Call { .. } => NodeKind::CallExpression,
            Self::New { .. } => NodeKind::NewExpression,
            Self::Member { .. } => NodeKind::MemberExpression,
            Self::Assign { .. } => NodeKind::AssignmentExpression,
            Self::Binary { .. } => NodeKind::BinaryExpression,
            Self::Logical { .. } => NodeKind::LogicalExpression,
            Self::Unary { .. } => NodeKind::UnaryExpression,
            Self::Update { .. } => NodeKind::UpdateExpression,
            Self::Conditional { .. } => NodeKind::ConditionalExpression,
            Self::Await { .. } => NodeKind::AwaitExpression,
            Self::Runtime(_) => NodeKind::CallExpression,
        }
    }

    pub fn pos(&self) -> Pos {
        match self {
            Self::Ident { pos, .. }
            | Self::Number { pos, .. }
            | Self::Str { pos, .. }
            | Self::Bool { pos, .. }
            | Self::Null { pos }
            | Self::Array { pos, .. }
            | Self::Object { pos, .. }
            | Self::Function { pos, .. }
            | Self::This { pos }
            | Self::Call { pos, .. }
            | Self::New { pos, .. }
            | Self::Member { pos, .. }
            | Self::Assign { pos, .. }
            | Self::Binary { pos, .. }
            | Self::Logical { pos, .. }
            | Self::Unary { pos, .. }
            | Self::Update { pos, .. }
            | Self::Conditional { pos, .. }
            | Self::Await { pos, .. } => *pos,
            Self::Arrow(arrow) => arrow.pos,
            Self::Runtime(_) => Pos::default(),
        }
    }
}

/// Guarded runtime-monitor call injected by the instrumentation pass
///
/// These are explicit accessor calls rather than synthesized member syntax,
/// so the interpreter dispatches them directly into the monitor.
#[derive(Debug, Clone)]
pub enum RuntimeCall {
    CheckSync,
    CheckAsync,
    CreateObj(Expr),
    CreateArr(Expr),
    GetProp { object: Expr, prop: Expr },
    SetProp { object: Expr, prop: Expr, value: Expr, op: AssignOp },
    CallProp { object: Expr, prop: Expr, args: Vec<Expr> },
    ComputedProp(Expr),
}
