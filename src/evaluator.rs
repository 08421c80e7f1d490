//! The step-driven evaluator and its garbage collector.
//!
//! Evaluation runs on an explicit stack of [`Layer`]s instead of host
//! recursion. Each call to [`Machine::step`] inspects the top layer and
//! performs exactly one observable transition: either a value is produced
//! into the result slot and the layer is popped, or a sub-expression is
//! pushed. Values flow between layers through a single result slot holding
//! a heap [`Location`]; a freshly popped layer leaves its value there and
//! the parent reads it at its next step.
//!
//! The stack bottom is a sentinel main frame with no expression; reaching
//! it ends evaluation. Frame layers (the main frame and closure calls) own
//! their environment; all other layers alias the environment of the frame
//! below them, which is how `letrec` extends and shrinks its caller's
//! scope in place.
//!
//! The collector runs only between steps. Its roots are the environments of
//! frame layers, the scratch locations of every layer, and the result
//! slot; marking chases captured closure environments from there. The
//! sweep slides surviving cells down (renumbering them), and a single
//! centralized root walk plus a pass over surviving closures repairs every
//! reference before evaluation resumes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::rc::Rc;

use crate::ast::{Callee, Expr};
use crate::heap::{Closure, Env, Heap, Location, Value, lookup};
use crate::intrinsics::{self, Io};
use crate::{Error, SourceLocation};

/// How many completed steps between collections in [`Machine::execute`].
pub const GC_INTERVAL: usize = 10_000;

const CALLEE: &str = "callee";
const ARGS: &str = "args";

/// A scratch binding local to one layer: either a single location or an
/// ordered vector of locations. Both shapes are collector roots.
#[derive(Debug, Clone)]
enum Local {
    One(Location),
    Many(Vec<Location>),
}

/// One entry of the explicit control stack.
struct Layer<'ast> {
    /// Shared with the owning frame; only frames count as environment
    /// owners for the collector.
    env: Rc<RefCell<Env>>,
    /// The expression under evaluation; `None` only on the sentinel main
    /// frame.
    expr: Option<&'ast Expr>,
    frame: bool,
    /// Program counter: which step of evaluating `expr` comes next.
    pc: usize,
    locals: HashMap<&'static str, Local>,
}

impl<'ast> Layer<'ast> {
    fn new(env: Rc<RefCell<Env>>, expr: &'ast Expr) -> Self {
        Layer {
            env,
            expr: Some(expr),
            frame: false,
            pc: 0,
            locals: HashMap::new(),
        }
    }

    fn frame(env: Rc<RefCell<Env>>, expr: Option<&'ast Expr>) -> Self {
        Layer {
            env,
            expr,
            frame: true,
            pc: 0,
            locals: HashMap::new(),
        }
    }
}

/// The complete execution state for one program.
pub struct Machine<'ast> {
    stack: Vec<Layer<'ast>>,
    heap: Heap<'ast>,
    /// The single slot through which values propagate between layers.
    /// Initialized to a fresh Void cell so it always names a live cell.
    result: Location,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl<'ast> Machine<'ast> {
    /// A machine wired to standard input and output.
    pub fn new(program: &'ast Expr) -> Self {
        Machine::with_io(
            program,
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    /// A machine with caller-supplied streams for `.get` and `.put`.
    pub fn with_io(program: &'ast Expr, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let result = heap.alloc(Value::Void);
        let main_env = Rc::new(RefCell::new(Env::new()));
        let stack = vec![
            Layer::frame(main_env.clone(), None),
            Layer::new(main_env, program),
        ];
        Machine {
            stack,
            heap,
            result,
            input,
            output,
        }
    }

    /// Drive [`Machine::step`] to completion, collecting every
    /// [`GC_INTERVAL`] steps and once more after termination so the final
    /// heap holds exactly the reachable cells.
    pub fn execute(&mut self) -> Result<(), Error> {
        let mut steps: usize = 0;
        while self.step()? {
            steps += 1;
            if steps % GC_INTERVAL == 0 {
                self.collect();
            }
        }
        self.collect();
        Ok(())
    }

    /// The value the program evaluated to (a fresh Void before any value
    /// has been produced).
    pub fn result_value(&self) -> &Value<'ast> {
        self.heap.get(self.result)
    }

    /// Number of heap cells, live or not; bounded by the reachable set
    /// right after a collection.
    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }

    /// Perform one transition. Returns `Ok(false)` exactly when the top
    /// layer is the sentinel main frame, i.e. evaluation is complete.
    pub fn step(&mut self) -> Result<bool, Error> {
        let top = self.stack.len() - 1;
        let Some(expr) = self.stack[top].expr else {
            return Ok(false);
        };

        match expr {
            Expr::Integer { value, .. } => {
                self.result = self.heap.alloc(Value::Integer(*value));
                self.stack.pop();
            }

            Expr::Str { value, .. } => {
                self.result = self.heap.alloc(Value::Str(value.clone()));
                self.stack.pop();
            }

            Expr::Variable(var) => {
                let loc = self
                    .lookup_current(top, &var.name)
                    .ok_or_else(|| Error::runtime(var.sl, "undefined variable"))?;
                // the location itself, not a copy of the cell
                self.result = loc;
                self.stack.pop();
            }

            Expr::Lambda(lambda) => {
                // capture-time snapshot: fresh binding list, shared locations
                let env = self.stack[top].env.borrow().clone();
                self.result = self.heap.alloc(Value::Closure(Closure { env, lambda }));
                self.stack.pop();
            }

            Expr::Set { target, value, .. } => {
                if self.stack[top].pc == 0 {
                    self.stack[top].pc = 1;
                    self.push_child(top, value);
                } else {
                    let loc = self
                        .lookup_current(top, &target.name)
                        .ok_or_else(|| Error::runtime(target.sl, "undefined variable"))?;
                    let cell = self.heap.get(self.result).clone();
                    *self.heap.get_mut(loc) = cell;
                    self.result = self.heap.alloc(Value::Void);
                    self.stack.pop();
                }
            }

            Expr::Letrec { bindings, body, .. } => {
                let pc = self.stack[top].pc;
                // back-patch the placeholder of the binding that just
                // finished; this is what lets recursive references resolve
                if pc > 1 && pc <= bindings.len() + 1 {
                    let target = &bindings[pc - 2].0;
                    let loc = self
                        .lookup_current(top, &target.name)
                        .ok_or_else(|| Error::runtime(target.sl, "undefined variable"))?;
                    let cell = self.heap.get(self.result).clone();
                    *self.heap.get_mut(loc) = cell;
                }
                if pc == 0 {
                    self.stack[top].pc = 1;
                    for (var, _) in bindings {
                        let placeholder = self.heap.alloc(Value::Void);
                        self.stack[top]
                            .env
                            .borrow_mut()
                            .push((var.name.clone(), placeholder));
                    }
                } else if pc <= bindings.len() {
                    self.stack[top].pc = pc + 1;
                    self.push_child(top, &bindings[pc - 1].1);
                } else if pc == bindings.len() + 1 {
                    self.stack[top].pc = pc + 1;
                    self.push_child(top, body);
                } else {
                    // the environment is shared with the enclosing frame,
                    // so the bindings must be popped before the layer is
                    let env = self.stack[top].env.clone();
                    let mut env = env.borrow_mut();
                    for _ in bindings {
                        env.pop();
                    }
                    drop(env);
                    self.stack.pop();
                }
            }

            Expr::If {
                cond,
                branch1,
                branch2,
                ..
            } => match self.stack[top].pc {
                0 => {
                    self.stack[top].pc = 1;
                    self.push_child(top, cond);
                }
                1 => {
                    self.stack[top].pc = 2;
                    let Value::Integer(flag) = self.heap.get(self.result) else {
                        return Err(Error::runtime(cond.sl(), "wrong condition type"));
                    };
                    let branch = if *flag != 0 { branch1 } else { branch2 };
                    self.push_child(top, branch);
                }
                _ => {
                    // value inherited through the result slot
                    self.stack.pop();
                }
            },

            Expr::While { cond, body, .. } => match self.stack[top].pc {
                0 => {
                    self.stack[top].pc = 1;
                    self.push_child(top, cond);
                }
                _ => {
                    let Value::Integer(flag) = self.heap.get(self.result) else {
                        return Err(Error::runtime(cond.sl(), "wrong condition type"));
                    };
                    if *flag != 0 {
                        // the body's value is discarded by the next
                        // condition evaluation overwriting the result slot
                        self.stack[top].pc = 0;
                        self.push_child(top, body);
                    } else {
                        self.result = self.heap.alloc(Value::Void);
                        self.stack.pop();
                    }
                }
            },

            Expr::Sequence { exprs, .. } => {
                let pc = self.stack[top].pc;
                if pc < exprs.len() {
                    self.stack[top].pc = pc + 1;
                    self.push_child(top, &exprs[pc]);
                } else {
                    // the sequence's value is its last expression's value
                    self.stack.pop();
                }
            }

            Expr::Call {
                callee: Callee::Intrinsic { name, sl },
                args,
                ..
            } => {
                let pc = self.stack[top].pc;
                if pc > 1 && pc <= args.len() + 1 {
                    self.push_arg(top, *sl)?;
                }
                if pc == 0 {
                    self.stack[top].pc = 1;
                    self.stack[top].locals.insert(ARGS, Local::Many(Vec::new()));
                } else if pc <= args.len() {
                    self.stack[top].pc = pc + 1;
                    self.push_child(top, &args[pc - 1]);
                } else {
                    // intrinsic calls never grow the stack
                    let value = self.dispatch_intrinsic(top, name, *sl)?;
                    self.result = self.heap.alloc(value);
                    self.stack.pop();
                }
            }

            Expr::Call {
                callee: Callee::Expr(callee),
                args,
                sl,
            } => {
                let pc = self.stack[top].pc;
                if pc > 2 && pc <= args.len() + 2 {
                    self.push_arg(top, *sl)?;
                }
                if pc == 0 {
                    self.stack[top].pc = 1;
                    self.push_child(top, callee);
                } else if pc == 1 {
                    self.stack[top].pc = 2;
                    let callee_loc = self.result;
                    let locals = &mut self.stack[top].locals;
                    locals.insert(CALLEE, Local::One(callee_loc));
                    locals.insert(ARGS, Local::Many(Vec::new()));
                } else if pc <= args.len() + 1 {
                    self.stack[top].pc = pc + 1;
                    self.push_child(top, &args[pc - 2]);
                } else if pc == args.len() + 2 {
                    self.stack[top].pc = pc + 1;
                    self.enter_closure(top, *sl)?;
                } else {
                    // value inherited from the closure body
                    self.stack.pop();
                }
            }

            Expr::Query {
                field, object, sl, ..
            } => match self.stack[top].pc {
                0 => {
                    self.stack[top].pc = 1;
                    self.push_child(top, object);
                }
                _ => {
                    let Value::Closure(closure) = self.heap.get(self.result) else {
                        return Err(Error::runtime(
                            *sl,
                            "variable query applied to a non-closure",
                        ));
                    };
                    let present = lookup(&field.name, &closure.env).is_some();
                    self.result = self.heap.alloc(Value::Integer(i64::from(present)));
                    self.stack.pop();
                }
            },

            Expr::Access {
                field, object, sl, ..
            } => match self.stack[top].pc {
                0 => {
                    self.stack[top].pc = 1;
                    self.push_child(top, object);
                }
                _ => {
                    let Value::Closure(closure) = self.heap.get(self.result) else {
                        return Err(Error::runtime(
                            *sl,
                            "variable access applied to a non-closure",
                        ));
                    };
                    let loc = lookup(&field.name, &closure.env)
                        .ok_or_else(|| Error::runtime(field.sl, "undefined variable"))?;
                    // alias the captured location itself; this is the
                    // language's record-field mechanism
                    self.result = loc;
                    self.stack.pop();
                }
            },
        }
        Ok(true)
    }

    /// Push a non-frame layer sharing the current layer's environment.
    fn push_child(&mut self, top: usize, expr: &'ast Expr) {
        let env = self.stack[top].env.clone();
        self.stack.push(Layer::new(env, expr));
    }

    fn lookup_current(&self, top: usize, name: &str) -> Option<Location> {
        lookup(name, &self.stack[top].env.borrow())
    }

    /// Record the just-produced argument value in the `args` scratch
    /// vector.
    fn push_arg(&mut self, top: usize, sl: SourceLocation) -> Result<(), Error> {
        let result = self.result;
        match self.stack[top].locals.get_mut(ARGS) {
            Some(Local::Many(locs)) => {
                locs.push(result);
                Ok(())
            }
            _ => Err(Error::runtime(sl, "evaluation scratch corrupted")),
        }
    }

    fn scratch_args(&self, top: usize, sl: SourceLocation) -> Result<Vec<Location>, Error> {
        match self.stack[top].locals.get(ARGS) {
            Some(Local::Many(locs)) => Ok(locs.clone()),
            _ => Err(Error::runtime(sl, "evaluation scratch corrupted")),
        }
    }

    fn scratch_callee(&self, top: usize, sl: SourceLocation) -> Result<Location, Error> {
        match self.stack[top].locals.get(CALLEE) {
            Some(Local::One(loc)) => Ok(*loc),
            _ => Err(Error::runtime(sl, "evaluation scratch corrupted")),
        }
    }

    /// Look the intrinsic up, validate its operand tuple, run it, and hand
    /// back the value for the caller to move into a fresh cell. Arguments
    /// are passed by reference: the intrinsic reads the heap cells but
    /// cannot change what any location holds.
    fn dispatch_intrinsic(
        &mut self,
        top: usize,
        name: &str,
        sl: SourceLocation,
    ) -> Result<Value<'ast>, Error> {
        let Some(intrinsic) = intrinsics::find(name) else {
            return Err(Error::runtime(sl, "unrecognized intrinsic call"));
        };
        let arg_locs = self.scratch_args(top, sl)?;
        let heap = &self.heap;
        let arg_values: Vec<&Value<'ast>> = arg_locs.iter().map(|&loc| heap.get(loc)).collect();
        intrinsic
            .check_operands(&arg_values)
            .map_err(|message| Error::runtime(sl, message))?;
        let mut io = Io {
            input: &mut *self.input,
            output: &mut *self.output,
        };
        (intrinsic.run)(&mut io, &arg_values).map_err(|message| Error::runtime(sl, message))
    }

    /// Check the callee and arity, build the callee frame's environment
    /// (closure snapshot plus parameters bound to the caller's argument
    /// locations), and push the frame.
    fn enter_closure(&mut self, top: usize, sl: SourceLocation) -> Result<(), Error> {
        let callee_loc = self.scratch_callee(top, sl)?;
        let arg_locs = self.scratch_args(top, sl)?;
        let (lambda, mut env) = match self.heap.get(callee_loc) {
            Value::Closure(closure) => (closure.lambda, closure.env.clone()),
            _ => return Err(Error::runtime(sl, "calling a non-callable")),
        };
        if arg_locs.len() != lambda.params.len() {
            return Err(Error::runtime(sl, "wrong number of arguments"));
        }
        for (param, loc) in lambda.params.iter().zip(&arg_locs) {
            // pass by reference: the same location is shared with the
            // caller, so `set` on the parameter mutates the caller's cell
            env.push((param.name.clone(), *loc));
        }
        self.stack
            .push(Layer::frame(Rc::new(RefCell::new(env)), Some(&*lambda.body)));
        Ok(())
    }

    //
    // Garbage collection
    //

    /// Mark from the roots, slide surviving cells down, and repair every
    /// reference (roots and captured closure environments). Returns the
    /// number of reclaimed cells. Must only be called between steps.
    pub fn collect(&mut self) -> usize {
        let marked = self.mark();
        let (reclaimed, relocation) = self.heap.compact(&marked);
        self.for_each_root_slot(|loc| *loc = relocation[*loc]);
        self.heap.relocate_closures(&relocation);
        reclaimed
    }

    fn mark(&mut self) -> Vec<bool> {
        let mut pending = Vec::new();
        self.for_each_root_slot(|loc| pending.push(*loc));
        let mut marked = vec![false; self.heap.len()];
        while let Some(loc) = pending.pop() {
            if marked[loc] {
                continue;
            }
            marked[loc] = true;
            if let Value::Closure(closure) = self.heap.get(loc) {
                for (_, captured) in &closure.env {
                    if !marked[*captured] {
                        pending.push(*captured);
                    }
                }
            }
        }
        marked
    }

    /// The one place that knows the root set: frame-owned environments,
    /// every layer's scratch locations, and the result slot. Marking
    /// collects through it and relocation rewrites through it, so the two
    /// can never disagree about what a root is.
    fn for_each_root_slot(&mut self, mut visit: impl FnMut(&mut Location)) {
        for layer in &mut self.stack {
            if layer.frame {
                // each frame has a distinct environment; non-frame layers
                // alias one of these and contribute nothing here
                let mut env = layer.env.borrow_mut();
                for (_, loc) in env.iter_mut() {
                    visit(loc);
                }
            }
            for local in layer.locals.values_mut() {
                match local {
                    Local::One(loc) => visit(loc),
                    Local::Many(locs) => {
                        for loc in locs {
                            visit(loc);
                        }
                    }
                }
            }
        }
        visit(&mut self.result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;
    use std::io::Cursor;

    /// Expected outcome of running a complete program.
    #[derive(Debug)]
    enum Outcome {
        /// The rendered final value.
        Value(&'static str),
        /// A runtime error with exactly this message.
        RuntimeError(&'static str),
    }
    use Outcome::*;

    fn run(source: &str) -> Result<String, Error> {
        crate::run_source(source)
    }

    fn check(source: &str, expected: &Outcome) {
        match (run(source), expected) {
            (Ok(rendered), Value(want)) => {
                assert_eq!(rendered, *want, "source:\n{source}");
            }
            (Err(Error::Runtime { message, .. }), RuntimeError(want)) => {
                assert_eq!(message, *want, "source:\n{source}");
            }
            (got, want) => panic!("source:\n{source}\n  got {got:?}, want {want:?}"),
        }
    }

    fn run_cases(cases: Vec<(&str, Outcome)>) {
        for (source, expected) in &cases {
            check(source, expected);
        }
    }

    /// A writer whose contents remain observable after the machine takes
    /// ownership of its `Box<dyn Write>` half.
    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_literals_and_intrinsics() {
        run_cases(vec![
            ("42", Value("42")),
            ("-7", Value("-7")),
            (r#""hello""#, Value("hello")),
            (r#""tab\there""#, Value("tab\there")),
            ("(.void)", Value("<void>")),
            ("(.+ 1 2)", Value("3")),
            ("(.- 1 2)", Value("-1")),
            ("(.* 6 7)", Value("42")),
            ("(./ 7 2)", Value("3")),
            ("(.% 7 3)", Value("1")),
            ("(.< 1 2)", Value("1")),
            ("(.< 2 1)", Value("0")),
            (r#"(.slen "abcd")"#, Value("4")),
            (r#"(.ssub "hello" 1 4)"#, Value("ell")),
            (r#"(.s+ "ab" "cd")"#, Value("abcd")),
            // either association of .s+ renders the same string
            (r#"(.s+ (.s+ "ab" "cd") "ef")"#, Value("abcdef")),
            (r#"(.s+ "ab" (.s+ "cd" "ef"))"#, Value("abcdef")),
            (r#"(.s< "ab" "cd")"#, Value("1")),
            ("(.i->s -42)", Value("-42")),
            (r#"(.s->i "-42")"#, Value("-42")),
            ("(.v? (.void))", Value("1")),
            ("(.i? 1)", Value("1")),
            (r#"(.s? "x")"#, Value("1")),
            ("(.c? lambda () 0)", Value("1")),
            ("(.c? 1)", Value("0")),
            ("(.type (.void))", Value("0")),
            ("(.type 5)", Value("1")),
            (r#"(.type "s")"#, Value("2")),
            ("(.type lambda (x) x)", Value("3")),
            // nested argument evaluation is strictly left to right
            ("(.+ (.* 2 3) (.- 8 2))", Value("12")),
        ]);
    }

    #[test]
    fn test_closure_rendering_carries_lambda_location() {
        run_cases(vec![
            ("lambda (x) x", Value("<closure evaluated at (SourceLocation 1 1)>")),
            ("[\n  lambda () 0\n]", Value("<closure evaluated at (SourceLocation 2 3)>")),
        ]);
    }

    #[test]
    fn test_control_flow() {
        run_cases(vec![
            ("if 1 2 3", Value("2")),
            ("if 0 2 3", Value("3")),
            ("if -1 2 3", Value("2")),
            ("[ 1 2 3 ]", Value("3")),
            ("[ 1 (.void) ]", Value("<void>")),
            ("while 0 1", Value("<void>")),
            (
                "letrec (n = 0) [ while (.< n 5) set n (.+ n 1) n ]",
                Value("5"),
            ),
        ]);
    }

    #[test]
    fn test_bindings_and_scoping() {
        run_cases(vec![
            ("letrec () 5", Value("5")),
            ("letrec (x = 1) x", Value("1")),
            // rightmost binding wins
            ("letrec (x = 1) letrec (x = 2) x", Value("2")),
            // the inner letrec pops its bindings on exit
            ("letrec (x = 1) [ letrec (x = 2) x x ]", Value("1")),
            // every letrec name is visible as a Void placeholder in every
            // binding expression
            ("letrec (a = b b = 1) a", Value("<void>")),
            // set copies the cell, it does not alias
            ("letrec (x = 1 y = 2) [ set x y set y 3 x ]", Value("2")),
            ("letrec (x = 1) set x 2", Value("<void>")),
            ("letrec (f = lambda () 7) (f)", Value("7")),
            ("((lambda (f) (f 3)) lambda (x) (.* x x))", Value("9")),
            (
                "letrec (
                     even = lambda (n) if (.< n 1) 1 (odd (.- n 1))
                     odd = lambda (n) if (.< n 1) 0 (even (.- n 1))
                 )
                 (even 10)",
                Value("1"),
            ),
        ]);
    }

    #[test]
    fn test_reference_semantics_law() {
        // arguments are passed by shared reference, so a set through the
        // parameter mutates the caller's binding
        run_cases(vec![(
            "letrec (x = 1 p = lambda (v) set v 2) [ (p x) x ]",
            Value("2"),
        )]);
    }

    #[test]
    fn test_lexical_capture_law() {
        run_cases(vec![
            // a closure captures locations: mutation of the cell is visible
            (
                "letrec (x = 1) letrec (f = lambda () x) [ set x 5 (f) ]",
                Value("5"),
            ),
            // but the binding list is a snapshot: later shadowing is not
            (
                "letrec (x = 1) letrec (f = lambda () x) letrec (x = 100) (f)",
                Value("1"),
            ),
        ]);
    }

    #[test]
    fn test_query_and_access() {
        run_cases(vec![
            ("@ v lambda () 0", Value("0")),
            ("letrec (v = 1) @ v lambda () 0", Value("1")),
            ("letrec (v = 1) & v lambda () 0", Value("1")),
            ("& v lambda () 0", RuntimeError("undefined variable")),
            ("@ v 1", RuntimeError("variable query applied to a non-closure")),
            ("& v 1", RuntimeError("variable access applied to a non-closure")),
        ]);
    }

    #[test]
    fn test_closure_records_in_order_tree_traversal() {
        // in-order traversal of the tree 4(2(1,3),5), concatenating the
        // node labels
        let source = r#"
            letrec (
                leaf = lambda () 0
                node = lambda (v l r) lambda () 0
                traverse = lambda (t)
                    if @ v t
                        (.s+ (.s+ (traverse & l t) & v t) (traverse & r t))
                        ""
            )
            (traverse
                (node "4"
                    (node "2" (node "1" leaf leaf) (node "3" leaf leaf))
                    (node "5" leaf leaf)))
        "#;
        check(source, &Value("12345"));
    }

    #[test]
    fn test_mutation_through_call_and_capture() {
        // "a" snapshotted before the call, "b" read twice afterwards: once
        // through the variable and once through the closure's captured
        // location
        let source = r#"
            letrec (
                x = "a"
                mutate = lambda (v) set v "b"
            )
            letrec (
                before = x
                probe = lambda () 0
            )
            [
                (mutate x)
                (.s+ (.s+ before x) & x probe)
            ]
        "#;
        check(source, &Value("abb"));
    }

    #[test]
    fn test_field_write_through_accessed_location() {
        // passing `& v obj` to a closure binds the parameter to the field's
        // location, so a set through it updates the field
        let source = r#"
            letrec (
                make = lambda (v) lambda () 0
                store = lambda (w) set w 42
            )
            letrec (obj = (make 7))
            [
                (store & v obj)
                (.s+ (.i->s & v obj) (.s+ (.i->s @ v obj) (.i->s @ u obj)))
            ]
        "#;
        check(source, &Value("4210"));
    }

    #[test]
    fn test_fibonacci_with_while() {
        let source = "
            letrec (a = 1 b = 1)
            [
                while (.< b 100)
                    letrec (t = b)
                    [
                        set b (.+ a b)
                        set a t
                    ]
                (.i->s b)
            ]
        ";
        check(source, &Value("144"));
    }

    #[test]
    fn test_deep_recursion_on_explicit_stack() {
        // 10000 levels of recursion would overflow a host call stack; the
        // layer stack takes it in stride (and GC runs mid-flight)
        let source = "
            letrec (
                sum = lambda (n) if (.< n 1) 0 (.+ n (sum (.- n 1)))
            )
            (sum 10000)
        ";
        check(source, &Value("50005000"));
    }

    #[test]
    fn test_runtime_errors() {
        run_cases(vec![
            ("x", RuntimeError("undefined variable")),
            ("set x 1", RuntimeError("undefined variable")),
            (r#"if "a" 1 2"#, RuntimeError("wrong condition type")),
            (r#"while "a" 1"#, RuntimeError("wrong condition type")),
            ("(1 2)", RuntimeError("calling a non-callable")),
            ("((lambda (x) x))", RuntimeError("wrong number of arguments")),
            ("((lambda () 0) 1)", RuntimeError("wrong number of arguments")),
            ("(.+ 1)", RuntimeError("type error on intrinsic call")),
            (r#"(.+ 1 "a")"#, RuntimeError("type error on intrinsic call")),
            (r#"(.put "s")"#, RuntimeError("type error on intrinsic call")),
            ("(.frobnicate)", RuntimeError("unrecognized intrinsic call")),
            ("(./ 1 0)", RuntimeError("division by zero")),
            ("(.% 1 0)", RuntimeError("modulus by zero")),
            (
                "(.+ 9223372036854775807 1)",
                RuntimeError("integer overflow in addition"),
            ),
            (r#"(.s->i "abc")"#, RuntimeError("string does not denote an integer")),
        ]);
    }

    #[test]
    fn test_error_locations() {
        let err = run("[\n  1\n  missing\n]").expect_err("undefined variable expected");
        assert_eq!(err.location(), SourceLocation::new(3, 3));

        let err = run("(.frobnicate)").expect_err("unknown intrinsic expected");
        // the intrinsic name's own position
        assert_eq!(err.location(), SourceLocation::new(1, 2));
    }

    #[test]
    fn test_step_reports_termination_idempotently() {
        let tokens = lex("(.+ 20 22)").expect("lexing should succeed");
        let program = parse(tokens).expect("parsing should succeed");
        let mut machine = Machine::new(&program);
        while machine.step().expect("no runtime error expected") {}
        assert_eq!(machine.result_value().to_string(), "42");
        // the sentinel main frame stays; further steps keep reporting end
        assert!(!machine.step().expect("no runtime error expected"));
        assert_eq!(machine.result_value().to_string(), "42");
    }

    #[test]
    fn test_collect_between_any_two_steps_is_unobservable() {
        let source = "
            letrec (
                sum = lambda (n) if (.< n 1) 0 (.+ n (sum (.- n 1)))
            )
            (.i->s (sum 100))
        ";
        let tokens = lex(source).expect("lexing should succeed");
        let program = parse(tokens).expect("parsing should succeed");

        let mut plain = Machine::new(&program);
        plain.execute().expect("plain run should succeed");

        let mut collected = Machine::new(&program);
        while collected.step().expect("collected run should succeed") {
            collected.collect();
        }
        assert_eq!(
            plain.result_value().to_string(),
            collected.result_value().to_string()
        );
        assert_eq!(plain.result_value().to_string(), "5050");
    }

    #[test]
    fn test_collector_reclaims_everything_unreachable() {
        let tokens = lex(r#"[ "a" "b" ]"#).expect("lexing should succeed");
        let program = parse(tokens).expect("parsing should succeed");
        let mut machine = Machine::new(&program);
        while machine.step().expect("no runtime error expected") {}
        // initial result Void, "a", "b"
        assert_eq!(machine.heap_size(), 3);
        // everything but the final "b" is garbage
        assert_eq!(machine.collect(), 2);
        assert_eq!(machine.heap_size(), 1);
        assert_eq!(machine.result_value().to_string(), "b");
        // a second collection finds nothing more
        assert_eq!(machine.collect(), 0);
    }

    #[test]
    fn test_heap_bounded_after_execute() {
        // allocates far more than GC_INTERVAL cells and retains none
        let source = r#"
            letrec (
                spin = lambda (n) if (.< n 1) 0 [ "garbage" (spin (.- n 1)) ]
            )
            [ (spin 30000) "done" ]
        "#;
        let tokens = lex(source).expect("lexing should succeed");
        let program = parse(tokens).expect("parsing should succeed");
        let mut machine = Machine::new(&program);
        machine.execute().expect("run should succeed");
        assert_eq!(machine.result_value().to_string(), "done");
        // after the final collection only the result cell survives
        assert_eq!(machine.heap_size(), 1);
    }

    #[test]
    fn test_closure_environment_survives_relocation() {
        // obj stays live across collections triggered by the garbage loop;
        // its captured location must be repaired, not dangling
        let source = r#"
            letrec (
                make = lambda (v) lambda () 0
                spin = lambda (n) if (.< n 1) 0 [ "garbage" (spin (.- n 1)) ]
            )
            letrec (obj = (make 5))
            [ (spin 20000) (.i->s & v obj) ]
        "#;
        check(source, &Value("5"));
    }

    #[test]
    fn test_get_and_put_io() {
        let out = SharedBuf::default();
        let rendered = crate::run_source_with_io(
            "[ (.put (.+ (.get) (.get))) (.put 7) ]",
            Box::new(Cursor::new(b"20\n22\n".to_vec())),
            Box::new(out.clone()),
        )
        .expect("run should succeed");
        assert_eq!(rendered, "<void>");
        assert_eq!(*out.0.borrow(), b"42\n7\n".to_vec());
    }
}
