use intcode::asm::{
    self, Calculation, Error, Immediate, InputParam, Instr, Jump, OutputParam, Statement,
};
use intcode::vm::{Machine, TestingDevice};

fn assemble(source: &str) -> Vec<i64> {
    let statements = asm::parse::parse("test.asm", source).unwrap();
    asm::encode(&statements).unwrap()
}

fn run(program: &[i64], input: Vec<i64>) -> Vec<i64> {
    let mut device = TestingDevice::with_words(input);
    Machine::new(program).run(&mut device).unwrap();
    device.output
}

#[test]
fn test_fixed_instruction_sizes() {
    let calculation = || Calculation {
        a: InputParam::literal(0),
        b: InputParam::literal(0),
        out: OutputParam::address(0),
    };
    let jump = || Jump {
        condition: InputParam::literal(0),
        target: InputParam::literal(0),
    };
    let instructions = vec![
        Instr::Literal(7),
        Instr::Add(calculation()),
        Instr::Mul(calculation()),
        Instr::LessThan(calculation()),
        Instr::Equals(calculation()),
        Instr::Input(OutputParam::address(0)),
        Instr::Output(InputParam::literal(0)),
        Instr::JumpIfTrue(jump()),
        Instr::JumpIfFalse(jump()),
        Instr::AdjustRelativeBase(InputParam::literal(0)),
        Instr::Halt,
    ];
    for instr in instructions {
        let encoded = asm::encode(&[Statement::Instr(instr.clone())]).unwrap();
        assert_eq!(
            encoded.len() as i64,
            instr.size(),
            "size mismatch for {}",
            instr
        );
    }
}

#[test]
fn test_labels_resolve_to_cell_offsets() {
    let source = "\
  jz 0, start
message:
  .ascii \"ok\"
start:
  out *message
  halt
";
    let statements = asm::parse::parse("test.asm", source).unwrap();
    let encoded = asm::encode(&statements).unwrap();
    // The jump skips the 3 jump cells plus the 3 string cells.
    assert_eq!(encoded, vec![1106, 0, 6, 111, 107, 0, 4, 3, 99]);
    assert_eq!(run(&encoded, vec![]), vec![111]);
}

#[test]
fn test_defines_substitute_immediates() {
    let source = "\
.define newline 10
  out newline
  halt
";
    let encoded = assemble(source);
    assert_eq!(encoded, vec![104, 10, 99]);
    assert_eq!(run(&encoded, vec![]), vec![10]);
}

#[test]
fn test_binding_labels_enable_self_modification() {
    // The add stores into the cell of the out instruction's operand.
    let source = "\
  add 38, 4, *t
  out 0 @ t
  halt
";
    let encoded = assemble(source);
    assert_eq!(run(&encoded, vec![]), vec![42]);
}

#[test]
fn test_relative_operands_encode_mode_two() {
    let source = "\
  arb 7
  add 1, 2, base[0]
  halt
";
    let encoded = assemble(source);
    assert_eq!(encoded, vec![109, 7, 21101, 1, 2, 0, 99]);
    let mut machine = Machine::new(&encoded);
    let mut device = TestingDevice::default();
    machine.run(&mut device).unwrap();
    assert_eq!(machine.memory().get(7), 3);
}

#[test]
fn test_ascii_emits_terminated_bytes() {
    let encoded = assemble("data:\n  .ascii \"hi\\n\"\n");
    assert_eq!(encoded, vec![104, 105, 10, 0]);
}

#[test]
fn test_negative_literals() {
    assert_eq!(assemble("  .int -5\n"), vec![-5]);
}

#[test]
fn test_duplicate_labels_are_fatal() {
    let statements = asm::parse::parse("test.asm", "x:\n  halt\nx:\n").unwrap();
    assert_eq!(
        asm::encode(&statements),
        Err(Error::DuplicateLabel("x".to_string()))
    );
}

#[test]
fn test_unresolved_names_are_fatal() {
    let statements = asm::parse::parse("test.asm", "  jz 0, nowhere\n").unwrap();
    assert_eq!(
        asm::encode(&statements),
        Err(Error::UndefinedName("nowhere".to_string()))
    );
}

#[test]
fn test_assembly_is_deterministic() {
    let source = "\
.define limit 3
loop:
  add *counter, 1, *counter
  lt *counter, limit, *again
again:
  jnz 0, loop
counter:
  .int 0
  halt
";
    assert_eq!(assemble(source), assemble(source));
}

#[test]
fn test_parse_rejects_unknown_directives() {
    assert!(asm::parse::parse("test.asm", "  .word 5\n").is_err());
}

#[test]
fn test_display_round_trips_through_the_parser() {
    let source = "\
  add *x, -3, base[2] @ t
  in *x
  out 7
x:
  .int heapstart
.define heapstart 9
  halt
";
    let statements = asm::parse::parse("test.asm", source).unwrap();
    let printed: String = statements.iter().map(|s| format!("{}\n", s)).collect();
    let reparsed = asm::parse::parse("printed.asm", &printed).unwrap();
    assert_eq!(statements, reparsed);
    assert_eq!(
        asm::encode(&statements).unwrap(),
        asm::encode(&reparsed).unwrap()
    );
}

#[test]
fn test_define_values_may_name_labels() {
    let source = "\
.define entry start
  jz 0, entry
  halt
start:
  out 1
  halt
";
    let encoded = assemble(source);
    assert_eq!(run(&encoded, vec![]), vec![1]);
}

#[test]
fn test_immediate_encoding_of_names() {
    // A name in immediate position becomes the label's offset.
    let statements = vec![
        Statement::Instr(Instr::Output(InputParam::name("data"))),
        Statement::Instr(Instr::Halt),
        Statement::Label("data".to_string()),
        Statement::Directive(asm::Directive::Int(Immediate::Literal(5))),
    ];
    assert_eq!(asm::encode(&statements).unwrap(), vec![104, 3, 99, 5]);
}
