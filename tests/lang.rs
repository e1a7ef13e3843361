use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use intcode::lang::{self, codegen, loader, parse};
use intcode::vm::{Machine, TestingDevice};
use intcode::asm;

fn generate(source: &str) -> Result<Vec<asm::Statement>, codegen::Error> {
    let module = parse::parse("main.is", source).unwrap();
    let mut modules = BTreeMap::new();
    modules.insert(PathBuf::from("main.is"), module);
    codegen::generate(&modules, &[PathBuf::from("main.is")])
}

fn compile(source: &str) -> Vec<i64> {
    asm::encode(&generate(source).unwrap()).unwrap()
}

fn run(program: &[i64], input: Vec<i64>) -> Vec<i64> {
    let mut device = TestingDevice::with_words(input);
    Machine::new(program).run(&mut device).unwrap();
    device.output
}

fn run_source(source: &str, input: Vec<i64>) -> Vec<i64> {
    run(&compile(source), input)
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/programs")
        .join(name)
}

#[test]
fn test_echo() {
    let source = "\
function main() {
  var c;
  c = input;
  while c != 0 {
    output c;
    c = input;
  }
  return 0;
}
";
    let program = compile(source);
    let mut device = TestingDevice::new("hi\n");
    device.input.push_back(0);
    Machine::new(&program).run(&mut device).unwrap();
    assert_eq!(device.output_str(), "hi\n");
}

#[test]
fn test_arithmetic() {
    let source = "\
function main() {
  output 2 * 3 + 4;
  halt;
}
";
    assert_eq!(run_source(source, vec![]), vec![10]);
}

#[test]
fn test_short_circuit_and() {
    let source = "\
function f() {
  output 1;
  return 0;
}
function g() {
  output 2;
  return 7;
}
function main() {
  if f() && g() {
    output 3;
  }
  return 0;
}
";
    // g is never evaluated once f yields 0.
    assert_eq!(run_source(source, vec![]), vec![1]);
}

#[test]
fn test_short_circuit_or() {
    let source = "\
function f() {
  output 1;
  return 7;
}
function g() {
  output 2;
  return 0;
}
function main() {
  if f() || g() {
    output 3;
  }
  return 0;
}
";
    // f is truthy, so g never runs and the branch is taken.
    assert_eq!(run_source(source, vec![]), vec![1, 3]);
}

#[test]
fn test_boolean_operators_evaluate_both_sides_when_needed() {
    let source = "\
function g() {
  output 2;
  return 7;
}
function main() {
  if g() && g() {
    output 9;
  }
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![2, 2, 9]);
}

#[test]
fn test_local_array() {
    let source = "\
function main() {
  var a[3];
  a[0] = 10;
  a[1] = 20;
  a[2] = 30;
  output a[0] + a[1] + a[2];
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![60]);
}

#[test]
fn test_global_array_and_while() {
    let source = "\
const N = 4;
var a[N];

function main() {
  var i;
  i = 0;
  while i < N {
    a[i] = i * i;
    i = i + 1;
  }
  output a[0] + a[1] + a[2] + a[3];
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![0 + 1 + 4 + 9]);
}

#[test]
fn test_import() {
    let statements = lang::compile(&fixture("b.is")).unwrap();
    let program = asm::encode(&statements).unwrap();
    assert_eq!(run(&program, vec![]), vec![6]);
}

#[test]
fn test_import_cycles_are_diagnosed() {
    match lang::compile(&fixture("cycle_x.is")) {
        Err(lang::CompileError::Load(loader::Error::ImportCycle(stuck))) => {
            assert_eq!(stuck.len(), 2);
        }
        other => panic!("expected an import cycle, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_imports_are_diagnosed() {
    match lang::compile(&fixture("dangling.is")) {
        Err(lang::CompileError::Load(loader::Error::MissingImport { path, .. })) => {
            assert!(path.ends_with("nonexistent.is"));
        }
        other => panic!("expected a missing import, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_string_constants() {
    let source = "\
function main() {
  const s = \"ab\";
  output *s;
  output *(s + 1);
  output *(s + 2);
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![97, 98, 0]);
}

#[test]
fn test_string_literals_in_loops() {
    let source = "\
function main() {
  var p;
  p = \"hey\\n\";
  while *p != 0 {
    output *p;
    p = p + 1;
  }
  return 0;
}
";
    let expected: Vec<i64> = "hey\n".chars().map(|c| c as i64).collect();
    assert_eq!(run_source(source, vec![]), expected);
}

#[test]
fn test_break_and_continue() {
    let source = "\
function main() {
  var i;
  i = 0;
  while 1 {
    i = i + 1;
    if i == 3 {
      continue;
    }
    if i == 5 {
      break;
    }
    output i;
  }
  output 100;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![1, 2, 4, 100]);
}

#[test]
fn test_nested_loops_use_innermost_labels() {
    let source = "\
function main() {
  var i, j;
  i = 0;
  while i < 2 {
    i = i + 1;
    j = 0;
    while 1 {
      j = j + 1;
      if j == 2 {
        break;
      }
      output i * 10 + j;
    }
  }
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![11, 21]);
}

#[test]
fn test_arguments_and_return_values() {
    let source = "\
function difference(a, b) {
  return a - b;
}
function main() {
  output difference(10, 4);
  output difference(4, 10) + 100;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![6, 94]);
}

#[test]
fn test_global_state_across_calls() {
    let source = "\
var total;

function accumulate(x) {
  total = total + x;
  return total;
}

function main() {
  accumulate(3);
  accumulate(4);
  output total;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![7]);
}

#[test]
fn test_else_if_chains() {
    let source = "\
function classify(x) {
  if x < 10 {
    return 1;
  } else if x < 100 {
    return 2;
  } else {
    return 3;
  }
  return 0;
}
function main() {
  output classify(5);
  output classify(50);
  output classify(500);
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![1, 2, 3]);
}

#[test]
fn test_add_assign() {
    let source = "\
function main() {
  var x;
  x = 5;
  x += 2;
  output x;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![7]);
}

#[test]
fn test_add_assign_rejects_pointer_targets() {
    let source = "\
function main() {
  var a[1];
  a[0] += 1;
  return 0;
}
";
    assert_eq!(
        generate(source).unwrap_err(),
        codegen::Error::AddAssignThroughPointer {
            function: "main".to_string(),
        }
    );
}

#[test]
fn test_heapstart_is_the_program_length() {
    let source = "\
function main() {
  output heapstart;
  return 0;
}
";
    let program = compile(source);
    let expected = program.len() as i64;
    assert_eq!(run(&program, vec![]), vec![expected]);
}

#[test]
fn test_constant_folding() {
    let source = "\
const K = 2 * 3 + 1, L = K - 10;

function main() {
  output K;
  output L;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![7, -3]);
}

#[test]
fn test_function_pointers() {
    let source = "\
function seven() {
  return 7;
}
function apply(f) {
  return f();
}
function main() {
  output apply(seven);
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![7]);
}

#[test]
fn test_duplicate_locals_are_fatal() {
    let source = "\
function main() {
  var x;
  var x;
  return 0;
}
";
    assert_eq!(
        generate(source).unwrap_err(),
        codegen::Error::DuplicateLocal {
            name: "x".to_string(),
            function: "main".to_string(),
        }
    );
}

#[test]
fn test_duplicate_globals_are_fatal() {
    let source = "var x;\nvar x;\n";
    assert_eq!(
        generate(source).unwrap_err(),
        codegen::Error::DuplicateGlobal("x".to_string())
    );
}

#[test]
fn test_break_outside_loops_is_fatal() {
    let source = "\
function main() {
  break;
}
";
    assert_eq!(
        generate(source).unwrap_err(),
        codegen::Error::IllegalBreak {
            function: "main".to_string(),
        }
    );
}

#[test]
fn test_non_constant_array_sizes_are_fatal() {
    let source = "\
function main() {
  var x;
  x = 3;
  var a[x];
  return 0;
}
";
    assert!(generate(source).is_err());
}

#[test]
fn test_missing_main_fails_to_link() {
    let statements = generate("function helper() {\n  return 0;\n}\n").unwrap();
    assert_eq!(
        asm::encode(&statements),
        Err(asm::Error::UndefinedName("func_main".to_string()))
    );
}

#[test]
fn test_compilation_is_deterministic() {
    let source = "\
function main() {
  var i;
  i = input;
  while i {
    output i * i;
    i = i - 1;
  }
  return 0;
}
";
    assert_eq!(compile(source), compile(source));
}

#[test]
fn test_generated_assembly_round_trips_through_the_assembler() {
    let source = "\
function square(x) {
  return x * x;
}
function main() {
  var i;
  i = 0;
  while i < 3 {
    output square(i) && 1;
    i = i + 1;
  }
  output \"!\";
  return 0;
}
";
    let statements = generate(source).unwrap();
    let direct = asm::encode(&statements).unwrap();
    let printed: String = statements.iter().map(|s| format!("{}\n", s)).collect();
    let reparsed = asm::parse::parse("generated.asm", &printed).unwrap();
    let through_text = asm::encode(&reparsed).unwrap();
    assert_eq!(direct, through_text);
    assert_eq!(run(&direct, vec![]), run(&through_text, vec![]));
}

#[test]
fn test_shadowing_in_nested_scopes() {
    let source = "\
function main() {
  var x;
  x = 1;
  if 1 {
    var y;
    y = 10;
    output x + y;
  }
  output x;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![11, 1]);
}

#[test]
fn test_halt_statement_stops_everything() {
    let source = "\
function main() {
  output 1;
  halt;
  output 2;
  return 0;
}
";
    assert_eq!(run_source(source, vec![]), vec![1]);
}
