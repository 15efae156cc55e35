use std::collections::HashSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::str::FromStr;

use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1, line_ending, multispace0},
    combinator::map_res,
    multi::separated_list1,
    sequence::{preceded, tuple},
    IResult,
};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

/// A program value: an opcode or an operand.
type Word = u64;

/// Register contents, which are unbounded.
type Value = BigUint;

/// Part 1 gives up on programs which run longer than this.
const STEP_LIMIT: usize = 100_000_000;

/// Each loop iteration of a self-reproducing program consumes this
/// many bits of register A.
const DIGIT_BITS: u32 = 3;

#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum Reg {
    A,
    B,
    C,
}

impl Display for Reg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reg::A => "A",
            Reg::B => "B",
            Reg::C => "C",
        })
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Registers {
    a: Value,
    b: Value,
    c: Value,
}

impl Registers {
    fn get(&self, r: Reg) -> &Value {
        match r {
            Reg::A => &self.a,
            Reg::B => &self.b,
            Reg::C => &self.c,
        }
    }

    fn fetch(&self, operand: &Operand) -> Value {
        match operand {
            Operand::Literal(n) => Value::from(*n),
            Operand::Register(r) => self.get(*r).clone(),
        }
    }

    fn with_a(&self, a: Value) -> Registers {
        Registers {
            a,
            b: self.b.clone(),
            c: self.c.clone(),
        }
    }
}

impl Display for Registers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "A={} B={} C={}", self.a, self.b, self.c)
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum OperandKind {
    Literal,
    Combo,
    Ignored,
}

impl Display for OperandKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperandKind::Literal => "literal",
            OperandKind::Combo => "combo",
            OperandKind::Ignored => "ignored",
        })
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Opcode {
    Adv,
    Bxl,
    Bst,
    Jnz,
    Bxc,
    Out,
    Bdv,
    Cdv,
}

impl Opcode {
    #[cfg(test)]
    const ALL: [Opcode; 8] = [
        Opcode::Adv,
        Opcode::Bxl,
        Opcode::Bst,
        Opcode::Jnz,
        Opcode::Bxc,
        Opcode::Out,
        Opcode::Bdv,
        Opcode::Cdv,
    ];

    fn operand_kind(&self) -> OperandKind {
        match self {
            Opcode::Bxl | Opcode::Jnz => OperandKind::Literal,
            Opcode::Bxc => OperandKind::Ignored,
            Opcode::Adv | Opcode::Bst | Opcode::Out | Opcode::Bdv | Opcode::Cdv => {
                OperandKind::Combo
            }
        }
    }
}

impl TryFrom<Word> for Opcode {
    type Error = Word;
    fn try_from(w: Word) -> Result<Opcode, Word> {
        match w {
            0 => Ok(Opcode::Adv),
            1 => Ok(Opcode::Bxl),
            2 => Ok(Opcode::Bst),
            3 => Ok(Opcode::Jnz),
            4 => Ok(Opcode::Bxc),
            5 => Ok(Opcode::Out),
            6 => Ok(Opcode::Bdv),
            7 => Ok(Opcode::Cdv),
            other => Err(other),
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Opcode::Adv => "adv",
            Opcode::Bxl => "bxl",
            Opcode::Bst => "bst",
            Opcode::Jnz => "jnz",
            Opcode::Bxc => "bxc",
            Opcode::Out => "out",
            Opcode::Bdv => "bdv",
            Opcode::Cdv => "cdv",
        })
    }
}

/// A resolved combo operand.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Operand {
    Literal(Word),
    Register(Reg),
}

impl Operand {
    fn combo(raw: Word) -> Option<Operand> {
        match raw {
            0..=3 => Some(Operand::Literal(raw)),
            4 => Some(Operand::Register(Reg::A)),
            5 => Some(Operand::Register(Reg::B)),
            6 => Some(Operand::Register(Reg::C)),
            // 7 is reserved.
            _ => None,
        }
    }

    fn register(&self) -> Option<Reg> {
        match self {
            Operand::Literal(_) => None,
            Operand::Register(r) => Some(*r),
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(n) => write!(f, "{}", n),
            Operand::Register(r) => r.fmt(f),
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Instruction {
    Adv(Operand),
    Bxl(Word),
    Bst(Operand),
    Jnz(Word),
    Bxc,
    Out(Operand),
    Bdv(Operand),
    Cdv(Operand),
}

impl Instruction {
    /// Returns None when the operand is out of range for the opcode.
    /// No opcode accepts an operand above 7.
    fn decode(opcode: Opcode, operand: Word) -> Option<Instruction> {
        if operand > 7 {
            return None;
        }
        Some(match opcode {
            Opcode::Adv => Instruction::Adv(Operand::combo(operand)?),
            Opcode::Bxl => Instruction::Bxl(operand),
            Opcode::Bst => Instruction::Bst(Operand::combo(operand)?),
            Opcode::Jnz => Instruction::Jnz(operand),
            Opcode::Bxc => Instruction::Bxc,
            Opcode::Out => Instruction::Out(Operand::combo(operand)?),
            Opcode::Bdv => Instruction::Bdv(Operand::combo(operand)?),
            Opcode::Cdv => Instruction::Cdv(Operand::combo(operand)?),
        })
    }

    fn opcode(&self) -> Opcode {
        match self {
            Instruction::Adv(_) => Opcode::Adv,
            Instruction::Bxl(_) => Opcode::Bxl,
            Instruction::Bst(_) => Opcode::Bst,
            Instruction::Jnz(_) => Opcode::Jnz,
            Instruction::Bxc => Opcode::Bxc,
            Instruction::Out(_) => Opcode::Out,
            Instruction::Bdv(_) => Opcode::Bdv,
            Instruction::Cdv(_) => Opcode::Cdv,
        }
    }

    /// Registers whose values this instruction uses.
    fn reads(&self) -> Vec<Reg> {
        let mut result: Vec<Reg> = Vec::with_capacity(2);
        match self {
            Instruction::Adv(src) | Instruction::Bdv(src) | Instruction::Cdv(src) => {
                result.push(Reg::A);
                result.extend(src.register());
            }
            Instruction::Bst(src) | Instruction::Out(src) => {
                result.extend(src.register());
            }
            Instruction::Bxl(_) => result.push(Reg::B),
            Instruction::Jnz(_) => result.push(Reg::A),
            Instruction::Bxc => {
                result.push(Reg::B);
                result.push(Reg::C);
            }
        }
        result
    }

    fn writes(&self) -> Option<Reg> {
        match self {
            Instruction::Adv(_) => Some(Reg::A),
            Instruction::Bxl(_) | Instruction::Bst(_) | Instruction::Bxc | Instruction::Bdv(_) => {
                Some(Reg::B)
            }
            Instruction::Cdv(_) => Some(Reg::C),
            Instruction::Jnz(_) | Instruction::Out(_) => None,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match self {
            Instruction::Adv(src)
            | Instruction::Bst(src)
            | Instruction::Out(src)
            | Instruction::Bdv(src)
            | Instruction::Cdv(src) => write!(f, "{} {}", op, src),
            Instruction::Bxl(n) | Instruction::Jnz(n) => write!(f, "{} {}", op, n),
            Instruction::Bxc => op.fmt(f),
        }
    }
}

#[test]
fn test_operand_kind_matches_decoding() {
    for opcode in Opcode::ALL {
        let accepts_seven = Instruction::decode(opcode, 7).is_some();
        match opcode.operand_kind() {
            OperandKind::Combo => assert!(!accepts_seven, "{} should reject 7", opcode),
            OperandKind::Literal | OperandKind::Ignored => {
                assert!(accepts_seven, "{} should accept 7", opcode)
            }
        }
        assert_eq!(Instruction::decode(opcode, 8), None, "{} should reject 8", opcode);
        assert_eq!(Instruction::decode(opcode, Word::MAX), None);
    }
}

#[test]
fn test_disassembly() {
    let show = |opcode: Opcode, operand: Word| -> String {
        Instruction::decode(opcode, operand)
            .expect("valid test instruction")
            .to_string()
    };
    assert_eq!(show(Opcode::Adv, 3), "adv 3");
    assert_eq!(show(Opcode::Bst, 4), "bst A");
    assert_eq!(show(Opcode::Cdv, 5), "cdv B");
    assert_eq!(show(Opcode::Out, 6), "out C");
    assert_eq!(show(Opcode::Bxl, 7), "bxl 7");
    assert_eq!(show(Opcode::Bxc, 7), "bxc");
    assert_eq!(show(Opcode::Jnz, 0), "jnz 0");
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ExecutionError {
    InvalidOperand {
        pc: usize,
        opcode: Opcode,
        operand: Word,
    },
    UnknownOpcode {
        pc: usize,
        opcode: Word,
    },
    OutOfBounds {
        pc: usize,
        len: usize,
    },
    StepLimitExceeded {
        limit: usize,
    },
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::InvalidOperand {
                pc,
                opcode,
                operand: 7,
            } => write!(
                f,
                "at pc {}: {} uses the reserved combo operand 7",
                pc, opcode
            ),
            ExecutionError::InvalidOperand { pc, opcode, operand } => write!(
                f,
                "at pc {}: {} is not a valid {} operand for {}",
                pc,
                operand,
                opcode.operand_kind(),
                opcode
            ),
            ExecutionError::UnknownOpcode { pc, opcode } => {
                write!(f, "at pc {}: non-existent opcode {}", pc, opcode)
            }
            ExecutionError::OutOfBounds { pc, len } => write!(
                f,
                "at pc {}: opcode has no operand (program length is {})",
                pc, len
            ),
            ExecutionError::StepLimitExceeded { limit } => {
                write!(f, "program did not halt within {} steps", limit)
            }
        }
    }
}

impl Error for ExecutionError {}

fn decode_at(program: &[Word], pc: usize) -> Result<Instruction, ExecutionError> {
    let (raw_opcode, raw_operand) = match (program.get(pc), program.get(pc + 1)) {
        (Some(&op), Some(&operand)) => (op, operand),
        _ => {
            return Err(ExecutionError::OutOfBounds {
                pc,
                len: program.len(),
            });
        }
    };
    let opcode = Opcode::try_from(raw_opcode)
        .map_err(|opcode| ExecutionError::UnknownOpcode { pc, opcode })?;
    match Instruction::decode(opcode, raw_operand) {
        Some(instruction) => Ok(instruction),
        None => Err(ExecutionError::InvalidOperand {
            pc,
            opcode,
            operand: raw_operand,
        }),
    }
}

/// Computes `value div 2^amount`.  No value in memory has `usize::MAX`
/// bits, so a larger shift leaves nothing.
fn shift_right(value: &Value, amount: &Value) -> Value {
    match amount.to_usize() {
        Some(n) => value >> n,
        None => Value::zero(),
    }
}

/// Computes `value mod 8`.
fn low_digit(value: &Value) -> Word {
    value.iter_u64_digits().next().unwrap_or(0) % 8
}

#[test]
fn test_shift_right() {
    let shift = |value: Value, amount: Value| shift_right(&value, &amount);
    assert_eq!(shift(729u32.into(), 1u32.into()), Value::from(364u32));
    assert_eq!(shift(729u32.into(), 0u32.into()), Value::from(729u32));
    assert_eq!(shift(Word::MAX.into(), 63u32.into()), Value::from(1u32));
    assert!(shift(Word::MAX.into(), 64u32.into()).is_zero());
    assert!(shift(Word::MAX.into(), Value::from(1u32) << 100).is_zero());
    assert_eq!(
        shift(Value::from(5u32) << 200, 198u32.into()),
        Value::from(20u32)
    );
}

#[test]
fn test_low_digit() {
    assert_eq!(low_digit(&Value::zero()), 0);
    assert_eq!(low_digit(&Value::from(2024u32)), 0);
    assert_eq!(low_digit(&Value::from(29u32)), 5);
    assert_eq!(low_digit(&((Value::from(1u32) << 100) + 7u32)), 7);
}

/// The result of a program which ran off the end.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Halted {
    registers: Registers,
    output: Vec<Word>,
}

fn render_output(output: &[Word]) -> String {
    output
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<String>>()
        .join(",")
}

#[derive(Debug)]
struct Machine<'a> {
    program: &'a [Word],
    registers: Registers,
    pc: usize,
    output: Vec<Word>,
}

impl<'a> Machine<'a> {
    fn new(program: &'a [Word], registers: Registers) -> Machine<'a> {
        Machine {
            program,
            registers,
            pc: 0,
            output: Vec::new(),
        }
    }

    fn step(&mut self) -> Result<(), ExecutionError> {
        let instruction = decode_at(self.program, self.pc)?;
        event!(
            Level::TRACE,
            "pc={:>3}: {:<6} {}",
            self.pc,
            instruction.to_string(),
            self.registers
        );
        let regs = &mut self.registers;
        let mut next_pc = self.pc + 2;
        match instruction {
            Instruction::Adv(src) => {
                regs.a = shift_right(&regs.a, &regs.fetch(&src));
            }
            Instruction::Bxl(n) => {
                regs.b ^= Value::from(n);
            }
            Instruction::Bst(src) => {
                regs.b = Value::from(low_digit(&regs.fetch(&src)));
            }
            Instruction::Jnz(target) => {
                if !regs.a.is_zero() {
                    next_pc = usize::try_from(target).unwrap_or(usize::MAX);
                }
            }
            Instruction::Bxc => {
                regs.b ^= &regs.c;
            }
            Instruction::Out(src) => {
                let digit = low_digit(&regs.fetch(&src));
                self.output.push(digit);
            }
            Instruction::Bdv(src) => {
                regs.b = shift_right(&regs.a, &regs.fetch(&src));
            }
            Instruction::Cdv(src) => {
                regs.c = shift_right(&regs.a, &regs.fetch(&src));
            }
        }
        self.pc = next_pc;
        Ok(())
    }

    fn run(mut self, limit: Option<usize>) -> Result<Halted, ExecutionError> {
        let mut steps: usize = 0;
        while self.pc < self.program.len() {
            if let Some(limit) = limit {
                if steps >= limit {
                    return Err(ExecutionError::StepLimitExceeded { limit });
                }
            }
            self.step()?;
            steps += 1;
        }
        event!(
            Level::TRACE,
            "halted after {} steps with {}; output {}",
            steps,
            self.registers,
            render_output(&self.output)
        );
        Ok(Halted {
            registers: self.registers,
            output: self.output,
        })
    }
}

/// Run `program` from pc 0 until it runs off the end.
pub fn execute(program: &[Word], registers: Registers) -> Result<Halted, ExecutionError> {
    Machine::new(program, registers).run(None)
}

pub fn execute_with_limit(
    program: &[Word],
    registers: Registers,
    max_steps: usize,
) -> Result<Halted, ExecutionError> {
    Machine::new(program, registers).run(Some(max_steps))
}

#[cfg(test)]
fn regs(a: Word, b: Word, c: Word) -> Registers {
    Registers {
        a: a.into(),
        b: b.into(),
        c: c.into(),
    }
}

#[test]
fn test_execute_sample() {
    let halted = execute(&[0, 1, 5, 4, 3, 0], regs(729, 0, 0)).expect("sample should run");
    assert_eq!(render_output(&halted.output), "4,6,3,5,6,3,5,2,1,0");
}

#[test]
fn test_execute_halving_loop() {
    // Simulate "A <- A div 2; emit A mod 8; loop while A != 0" directly.
    let mut a: Word = 10;
    let mut expected: Vec<Word> = Vec::new();
    loop {
        a /= 2;
        expected.push(a % 8);
        if a == 0 {
            break;
        }
    }
    let halted = execute(&[0, 1, 5, 4, 3, 0], regs(10, 0, 0)).expect("program should run");
    assert_eq!(halted.output, expected);
    assert_eq!(render_output(&halted.output), "5,2,1,0");
    assert!(halted.registers.a.is_zero());
}

#[test]
fn test_execute_small_examples() {
    let halted = execute(&[2, 6], regs(0, 0, 9)).expect("bst C");
    assert_eq!(halted.registers.b, Value::from(1u32));

    let halted = execute(&[5, 0, 5, 1, 5, 4], regs(10, 0, 0)).expect("out");
    assert_eq!(render_output(&halted.output), "0,1,2");

    let halted = execute(&[0, 1, 5, 4, 3, 0], regs(2024, 0, 0)).expect("loop");
    assert_eq!(render_output(&halted.output), "4,2,5,6,7,7,7,7,3,1,0");
    assert!(halted.registers.a.is_zero());

    let halted = execute(&[1, 7], regs(0, 29, 0)).expect("bxl");
    assert_eq!(halted.registers.b, Value::from(26u32));

    let halted = execute(&[4, 0], regs(0, 2024, 43690)).expect("bxc");
    assert_eq!(halted.registers.b, Value::from(44354u32));
}

#[test]
fn test_bxl_operand_is_literal() {
    // Operand 4 would mean register A if it were a combo operand.
    let halted = execute(&[1, 4], regs(100, 1, 33)).expect("bxl 4");
    assert_eq!(halted.registers, regs(100, 5, 33));
    // ... and 7 would be reserved.
    let halted = execute(&[1, 7], regs(100, 1, 33)).expect("bxl 7");
    assert_eq!(halted.registers, regs(100, 6, 33));
}

#[test]
fn test_bxc_only_writes_b() {
    // The operand of bxc is never looked at, not even 7.
    let halted = execute(&[4, 7, 4, 3], regs(12, 2024, 43690)).expect("bxc");
    assert_eq!(halted.registers, regs(12, 2024, 43690));
    let halted = execute(&[4, 7], regs(12, 2024, 43690)).expect("bxc");
    assert_eq!(halted.registers, regs(12, 44354, 43690));
}

#[test]
fn test_division_by_huge_power_of_two() {
    let halted = execute(&[0, 5, 7, 6], regs(5, Word::MAX, 64)).expect("adv B; cdv C");
    assert_eq!(halted.registers, regs(0, Word::MAX, 0));
    let halted = execute(&[6, 6], regs(Word::MAX, 0, 63)).expect("bdv C");
    assert_eq!(halted.registers.b, Value::from(1u32));
}

#[test]
fn test_registers_wider_than_64_bits() {
    let wide: Value = (Value::from(1u32) << 100) + 5u32;
    let start = regs(0, 0, 0).with_a(wide.clone());
    // adv 3; bxl 7; bst A; out A
    let halted = execute(&[0, 3, 1, 7, 2, 4, 5, 4], start).expect("wide program");
    assert_eq!(halted.registers.a, Value::from(1u32) << 97);
    assert_eq!(halted.registers.b, Value::zero());
    assert_eq!(halted.output, vec![0]);
    // A huge shift amount empties the register rather than failing.
    let start = Registers {
        a: wide.clone(),
        b: wide,
        c: Value::zero(),
    };
    let halted = execute(&[7, 5, 0, 5], start).expect("cdv B; adv B");
    assert!(halted.registers.a.is_zero());
    assert!(halted.registers.c.is_zero());
}

#[test]
fn test_jump_past_end_halts() {
    let halted = execute(&[3, 6, 5, 4], regs(1, 0, 0)).expect("jnz");
    assert!(halted.output.is_empty());
    let halted = execute(&[3, 7], regs(1, 0, 0)).expect("jnz");
    assert!(halted.output.is_empty());
    // With A == 0 the jump falls through.
    let halted = execute(&[3, 6, 5, 4], regs(0, 0, 0)).expect("jnz");
    assert_eq!(halted.output, vec![0]);
}

#[test]
fn test_operands_above_seven_are_rejected() {
    assert_eq!(
        execute(&[1, 9], regs(0, 0, 0)),
        Err(ExecutionError::InvalidOperand {
            pc: 0,
            opcode: Opcode::Bxl,
            operand: 9
        })
    );
    assert_eq!(
        execute(&[3, 8], regs(1, 0, 0)),
        Err(ExecutionError::InvalidOperand {
            pc: 0,
            opcode: Opcode::Jnz,
            operand: 8
        })
    );
    // Even when the jump would not be taken.
    assert!(matches!(
        execute(&[3, 100, 5, 4], regs(0, 0, 0)),
        Err(ExecutionError::InvalidOperand { pc: 0, operand: 100, .. })
    ));
    assert_eq!(
        execute(&[5, 4, 4, 200], regs(0, 0, 0)),
        Err(ExecutionError::InvalidOperand {
            pc: 2,
            opcode: Opcode::Bxc,
            operand: 200
        })
    );
    assert!(matches!(
        execute(&[0, Word::MAX], regs(0, 0, 0)),
        Err(ExecutionError::InvalidOperand { opcode: Opcode::Adv, .. })
    ));
}

#[test]
fn test_execution_errors() {
    assert_eq!(
        execute(&[2, 7], regs(0, 0, 0)),
        Err(ExecutionError::InvalidOperand {
            pc: 0,
            opcode: Opcode::Bst,
            operand: 7
        })
    );
    assert_eq!(
        execute(&[1, 0, 5, 9], regs(0, 0, 0)),
        Err(ExecutionError::InvalidOperand {
            pc: 2,
            opcode: Opcode::Out,
            operand: 9
        })
    );
    assert_eq!(
        execute(&[8, 0], regs(0, 0, 0)),
        Err(ExecutionError::UnknownOpcode { pc: 0, opcode: 8 })
    );
    // The first out runs, but there is no partial result.
    assert_eq!(
        execute(&[5, 4, 5], regs(3, 0, 0)),
        Err(ExecutionError::OutOfBounds { pc: 2, len: 3 })
    );
    assert!(matches!(
        execute_with_limit(&[3, 0], regs(1, 0, 0), 1000),
        Err(ExecutionError::StepLimitExceeded { limit: 1000 })
    ));
}

#[test]
fn test_execute_is_deterministic() {
    let program = [2, 4, 1, 1, 7, 5, 1, 5, 4, 0, 0, 3, 5, 5, 3, 0];
    let first = execute(&program, regs(61_156_655, 0, 0));
    let second = execute(&program, regs(61_156_655, 0, 0));
    assert!(first.is_ok());
    assert_eq!(first, second);
    assert_eq!(
        execute_with_limit(&program, regs(61_156_655, 0, 0), 10_000),
        first
    );
}

mod solver {
    use super::*;

    #[derive(Debug, PartialEq, Eq, Clone)]
    pub enum SolveError {
        /// No candidate reproduces the program from `position` onwards.
        SearchExhausted { position: usize, digit: Word },
        UnsupportedShape(String),
        Execution(ExecutionError),
    }

    impl Display for SolveError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                SolveError::SearchExhausted { position, digit } => write!(
                    f,
                    "no value of register A outputs {} at program position {}",
                    digit, position
                ),
                SolveError::UnsupportedShape(why) => {
                    write!(f, "cannot reverse-search this program: {}", why)
                }
                SolveError::Execution(e) => write!(f, "trial run failed: {}", e),
            }
        }
    }

    impl Error for SolveError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            match self {
                SolveError::Execution(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<ExecutionError> for SolveError {
        fn from(e: ExecutionError) -> SolveError {
            SolveError::Execution(e)
        }
    }

    fn unsupported(message: String) -> Result<(), SolveError> {
        Err(SolveError::UnsupportedShape(message))
    }

    /// The search builds A three bits at a time, which only finds the
    /// minimum when each loop iteration emits one digit and then
    /// shifts A right by three.  Reject anything else.
    pub fn check_shape(program: &[Word]) -> Result<(), SolveError> {
        let instructions: Vec<Instruction> = (0..program.len())
            .step_by(2)
            .map(|pc| decode_at(program, pc))
            .collect::<Result<Vec<Instruction>, ExecutionError>>()?;

        match instructions.last() {
            None => return unsupported("the program is empty".to_string()),
            Some(Instruction::Jnz(0)) => (),
            Some(other) => {
                return unsupported(format!("the program ends with {}, not jnz 0", other));
            }
        }
        let count = |op: Opcode| instructions.iter().filter(|i| i.opcode() == op).count();
        if count(Opcode::Jnz) != 1 {
            return unsupported(format!(
                "the program has {} jumps, only the final jnz 0 is allowed",
                count(Opcode::Jnz)
            ));
        }
        if count(Opcode::Out) != 1 {
            return unsupported(format!(
                "the loop body must output exactly once, not {} times",
                count(Opcode::Out)
            ));
        }
        let shifts: Vec<&Instruction> = instructions
            .iter()
            .filter(|i| i.opcode() == Opcode::Adv)
            .collect();
        match shifts.as_slice() {
            [Instruction::Adv(Operand::Literal(n))] if *n == Word::from(DIGIT_BITS) => (),
            [other] => {
                return unsupported(format!(
                    "the loop body shifts A with {}, not adv {}",
                    other, DIGIT_BITS
                ));
            }
            _ => {
                return unsupported(format!(
                    "the loop body must shift A exactly once, not {} times",
                    shifts.len()
                ));
            }
        }

        // B and C must not carry state from one iteration to the next.
        let mut written: HashSet<Reg> = HashSet::new();
        for instruction in &instructions {
            for r in instruction.reads() {
                if r != Reg::A && !written.contains(&r) {
                    return unsupported(format!(
                        "'{}' reads register {} before the loop body sets it",
                        instruction, r
                    ));
                }
            }
            if let Some(r) = instruction.writes() {
                written.insert(r);
            }
        }
        Ok(())
    }

    fn extend(prefix: &Value, low_bits: Word) -> Value {
        (prefix << DIGIT_BITS) + low_bits
    }

    /// Reverse search for the smallest initial A for which `program`
    /// outputs itself.  `observer` sees the surviving candidates after
    /// matching the program from each position to the end.
    pub fn search<F: FnMut(usize, &[Value])>(
        program: &[Word],
        registers: &Registers,
        mut observer: F,
    ) -> Result<Value, SolveError> {
        let span = span!(Level::INFO, "solve", len = program.len());
        let _enter = span.enter();
        check_shape(program)?;

        let mut candidates: Vec<Value> = vec![Value::zero()];
        for (position, &digit) in program.iter().enumerate().rev() {
            let wanted: &[Word] = &program[position..];
            let mut survivors: Vec<Value> = Vec::new();
            for prefix in candidates.iter() {
                for low_bits in 0..(1 << DIGIT_BITS) {
                    let candidate = extend(prefix, low_bits);
                    // Running the program itself tells us which digits
                    // this value of A produces.
                    let trial = registers.with_a(candidate.clone());
                    if execute(program, trial)?.output == wanted {
                        survivors.push(candidate);
                    }
                }
            }
            event!(
                Level::DEBUG,
                "position {:>2} (digit {}): {} of {} candidates survive",
                position,
                digit,
                survivors.len(),
                candidates.len() << DIGIT_BITS,
            );
            if survivors.is_empty() {
                return Err(SolveError::SearchExhausted { position, digit });
            }
            observer(position, survivors.as_slice());
            candidates = survivors;
        }
        match candidates.into_iter().min() {
            Some(a) => {
                event!(Level::INFO, "smallest self-reproducing A is {}", a);
                Ok(a)
            }
            None => Err(SolveError::UnsupportedShape(
                "the program is empty".to_string(),
            )),
        }
    }

    pub fn solve(program: &[Word], registers: &Registers) -> Result<Value, SolveError> {
        search(program, registers, |_, _| ())
    }
}

#[cfg(test)]
const QUINE_SAMPLE: [Word; 6] = [0, 3, 5, 4, 3, 0];

// bst A; bxl 1; cdv B; bxl 5; bxc; adv 3; out B; jnz 0
#[cfg(test)]
const REAL_SHAPE: [Word; 16] = [2, 4, 1, 1, 7, 5, 1, 5, 4, 0, 0, 3, 5, 5, 3, 0];

#[test]
fn test_solve_sample() {
    assert_eq!(
        solver::solve(&QUINE_SAMPLE, &regs(2024, 0, 0)),
        Ok(Value::from(117_440u32))
    );
    let halted = execute(&QUINE_SAMPLE, regs(117_440, 0, 0)).expect("sample should run");
    assert_eq!(halted.output, QUINE_SAMPLE.to_vec());
}

#[test]
fn test_survivors_reproduce_suffix() {
    let mut rounds: usize = 0;
    let observer = |position: usize, survivors: &[Value]| {
        rounds += 1;
        for a in survivors {
            let start = regs(0, 0, 0).with_a(a.clone());
            let halted = execute(&QUINE_SAMPLE, start).expect("candidate should run");
            assert_eq!(
                halted.output,
                QUINE_SAMPLE[position..].to_vec(),
                "candidate {} at position {}",
                a,
                position
            );
        }
    };
    assert!(solver::search(&QUINE_SAMPLE, &regs(0, 0, 0), observer).is_ok());
    assert_eq!(rounds, QUINE_SAMPLE.len());
}

#[test]
fn test_solve_exhausted() {
    // out 1 can never produce the final 0.
    assert_eq!(
        solver::solve(&[0, 3, 5, 1, 3, 0], &regs(0, 0, 0)),
        Err(solver::SolveError::SearchExhausted {
            position: 5,
            digit: 0
        })
    );
}

#[test]
fn test_solve_rejects_other_shapes() {
    let unsupported = |program: &[Word]| {
        matches!(
            solver::solve(program, &regs(0, 0, 0)),
            Err(solver::SolveError::UnsupportedShape(_))
        )
    };
    assert!(unsupported(&[]));
    // Shifts by one bit per iteration.
    assert!(unsupported(&[0, 1, 5, 4, 3, 0]));
    // Never loops.
    assert!(unsupported(&[0, 3, 5, 4]));
    // Two outputs per iteration.
    assert!(unsupported(&[0, 3, 5, 4, 5, 4, 3, 0]));
    // B carries over between iterations.
    assert!(unsupported(&[1, 2, 5, 5, 0, 3, 3, 0]));
    // Shift by a register.
    assert!(unsupported(&[2, 3, 0, 5, 5, 4, 3, 0]));
    assert!(solver::check_shape(&REAL_SHAPE).is_ok());
    assert!(solver::check_shape(&QUINE_SAMPLE).is_ok());
}

#[test]
fn test_solve_propagates_decoding_errors() {
    assert_eq!(
        solver::solve(&[0, 3, 5, 7, 3, 0], &regs(0, 0, 0)),
        Err(solver::SolveError::Execution(
            ExecutionError::InvalidOperand {
                pc: 2,
                opcode: Opcode::Out,
                operand: 7
            }
        ))
    );
    assert!(matches!(
        solver::solve(&[0, 3, 5, 4, 3], &regs(0, 0, 0)),
        Err(solver::SolveError::Execution(ExecutionError::OutOfBounds { .. }))
    ));
    assert!(matches!(
        solver::solve(&[0, 3, 1, 9, 5, 4, 3, 0], &regs(0, 0, 0)),
        Err(solver::SolveError::Execution(ExecutionError::InvalidOperand {
            opcode: Opcode::Bxl,
            operand: 9,
            ..
        }))
    ));
}

#[test]
fn test_solve_beyond_64_bits() {
    // adv 3; bst 0 (eight times); out A; jnz 0
    let mut program: Vec<Word> = vec![0, 3];
    for _ in 0..8 {
        program.extend_from_slice(&[2, 0]);
    }
    program.extend_from_slice(&[5, 4, 3, 0]);
    assert_eq!(program.len(), 22);

    let expected: Value = "33006953154706736320".parse().expect("valid number");
    assert!(expected > Value::from(Word::MAX));
    let a = solver::solve(&program, &regs(0, 0, 0)).expect("program has a solution");
    assert_eq!(a, expected);
    let halted = execute(&program, regs(0, 0, 0).with_a(a)).expect("solution should run");
    assert_eq!(halted.output, program);
}

#[test]
fn test_first_digit_matches_closed_form() {
    // The hand-derived first output digit for REAL_SHAPE.
    fn closed_form(a: Word) -> Word {
        let b = (a % 8) ^ 1;
        ((b ^ 5) ^ (a >> b)) % 8
    }
    for a in 0..4096 {
        let halted = execute(&REAL_SHAPE, regs(a, 0, 0)).expect("program should run");
        assert_eq!(halted.output.first(), Some(&closed_form(a)), "A={}", a);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Puzzle {
    registers: Registers,
    program: Vec<Word>,
}

#[derive(Debug)]
pub struct BadInput {
    input: String,
    message: String,
}

impl Display for BadInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "bad input '{}': {}", self.input, self.message)
    }
}

impl Error for BadInput {}

fn parse_word(input: &str) -> IResult<&str, Word> {
    map_res(digit1, FromStr::from_str)(input)
}

fn parse_value(input: &str) -> IResult<&str, Value> {
    map_res(digit1, Value::from_str)(input)
}

fn parse_register<'a>(input: &'a str, name: &str) -> IResult<&'a str, Value> {
    preceded(tuple((tag("Register "), tag(name), tag(": "))), parse_value)(input)
}

fn parse_puzzle(input: &str) -> IResult<&str, Puzzle> {
    let (input, a) = parse_register(input, "A")?;
    let (input, _) = line_ending(input)?;
    let (input, b) = parse_register(input, "B")?;
    let (input, _) = line_ending(input)?;
    let (input, c) = parse_register(input, "C")?;
    let (input, _) = line_ending(input)?;
    let (input, program) = preceded(
        tuple((multispace0, tag("Program: "))),
        separated_list1(char(','), parse_word),
    )(input)?;
    Ok((
        input,
        Puzzle {
            registers: Registers { a, b, c },
            program,
        },
    ))
}

impl TryFrom<&str> for Puzzle {
    type Error = BadInput;
    fn try_from(s: &str) -> Result<Puzzle, BadInput> {
        match parse_puzzle(s.trim_end()) {
            Ok((tail, puzzle)) => {
                if tail.is_empty() {
                    Ok(puzzle)
                } else {
                    Err(BadInput {
                        input: s.to_string(),
                        message: format!("unexpected trailing junk '{}'", tail),
                    })
                }
            }
            Err(e) => Err(BadInput {
                input: s.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
const SAMPLE: &str = concat!(
    "Register A: 729\n",
    "Register B: 0\n",
    "Register C: 0\n",
    "\n",
    "Program: 0,1,5,4,3,0\n",
);

#[test]
fn test_parse_puzzle() {
    assert_eq!(
        Puzzle::try_from(SAMPLE).expect("sample is valid"),
        Puzzle {
            registers: regs(729, 0, 0),
            program: vec![0, 1, 5, 4, 3, 0],
        }
    );
    let crlf = SAMPLE.replace('\n', "\r\n");
    assert!(Puzzle::try_from(crlf.as_str()).is_ok());
    // Out-of-range program values are the interpreter's problem.
    let wide = SAMPLE.replace("0,1,5,4,3,0", "9,12");
    assert_eq!(
        Puzzle::try_from(wide.as_str()).map(|p| p.program).ok(),
        Some(vec![9, 12])
    );
}

#[test]
fn test_parse_registers_wider_than_64_bits() {
    let text = SAMPLE.replace("729", "123456789012345678901234567890");
    let puzzle = Puzzle::try_from(text.as_str()).expect("wide register is valid");
    let expected: Value = "123456789012345678901234567890"
        .parse()
        .expect("valid number");
    assert_eq!(puzzle.registers.a, expected);
    let halted = execute(&puzzle.program, puzzle.registers).expect("sample should run");
    assert!(halted.registers.a.is_zero());
}

#[test]
fn test_parsed_operand_out_of_range_fails_at_execution() {
    let text = SAMPLE.replace("0,1,5,4,3,0", "1,9");
    let puzzle = Puzzle::try_from(text.as_str()).expect("input is well-formed");
    assert!(matches!(
        execute(&puzzle.program, puzzle.registers),
        Err(ExecutionError::InvalidOperand { operand: 9, .. })
    ));
}

#[test]
fn test_parse_puzzle_rejects_bad_input() {
    assert!(Puzzle::try_from(SAMPLE.replace("729", "-729").as_str()).is_err());
    assert!(Puzzle::try_from(SAMPLE.replace("Register B", "Register X").as_str()).is_err());
    assert!(Puzzle::try_from(format!("{}junk", SAMPLE).as_str()).is_err());
    assert!(Puzzle::try_from(SAMPLE.replace("0,1,5,4,3,0", "").as_str()).is_err());
    assert!(Puzzle::try_from("").is_err());
}

fn part1(puzzle: &Puzzle) {
    match execute_with_limit(&puzzle.program, puzzle.registers.clone(), STEP_LIMIT) {
        Ok(halted) => {
            println!("Day 17 part 1: {}", render_output(&halted.output));
        }
        Err(e) => {
            eprintln!("Day 17 part 1: failed: {}", e);
        }
    }
}

fn part2(puzzle: &Puzzle) {
    match solver::solve(&puzzle.program, &puzzle.registers) {
        Ok(a) => {
            println!("Day 17 part 2: {}", a);
        }
        Err(e) => {
            eprintln!("Day 17 part 2: failed: {}", e);
        }
    }
}

fn read_input() -> Result<String, String> {
    match std::env::args().nth(1) {
        Some(path) => {
            fs::read_to_string(&path).map_err(|e| format!("failed to read {}: {}", path, e))
        }
        None => {
            let mut input = String::new();
            match io::stdin().read_to_string(&mut input) {
                Ok(_) => Ok(input),
                Err(e) => Err(format!("failed to read input: {}", e)),
            }
        }
    }
}

fn run() -> Result<(), String> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .map_err(|e| e.to_string())?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let input = read_input()?;
    let puzzle = Puzzle::try_from(input.as_str()).map_err(|e| e.to_string())?;
    event!(
        Level::DEBUG,
        "loaded {} with a program of {} values",
        puzzle.registers,
        puzzle.program.len()
    );
    part1(&puzzle);
    part2(&puzzle);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
