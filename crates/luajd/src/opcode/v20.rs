// LuaJIT 2.0 opcode table (93 opcodes).

use super::{ArgType, Op, OpDescriptor, OpMode};

macro_rules! row {
    ($op:ident, $name:literal, $mode:ident, $a:ident, $b:ident, $cd:ident) => {
        OpDescriptor {
            op: Op::$op,
            name: $name,
            mode: OpMode::$mode,
            a: ArgType::$a,
            b: ArgType::$b,
            cd: ArgType::$cd,
        }
    };
}

pub static OPCODES: &[OpDescriptor] = &[
    row!(IsLt, "ISLT", Ad, Var, None, Var),
    row!(IsGe, "ISGE", Ad, Var, None, Var),
    row!(IsLe, "ISLE", Ad, Var, None, Var),
    row!(IsGt, "ISGT", Ad, Var, None, Var),
    row!(IsEqV, "ISEQV", Ad, Var, None, Var),
    row!(IsNeV, "ISNEV", Ad, Var, None, Var),
    row!(IsEqS, "ISEQS", Ad, Var, None, Str),
    row!(IsNeS, "ISNES", Ad, Var, None, Str),
    row!(IsEqN, "ISEQN", Ad, Var, None, Num),
    row!(IsNeN, "ISNEN", Ad, Var, None, Num),
    row!(IsEqP, "ISEQP", Ad, Var, None, Pri),
    row!(IsNeP, "ISNEP", Ad, Var, None, Pri),
    row!(IsTC, "ISTC", Ad, Dst, None, Var),
    row!(IsFC, "ISFC", Ad, Dst, None, Var),
    row!(IsT, "IST", Ad, None, None, Var),
    row!(IsF, "ISF", Ad, None, None, Var),
    row!(Mov, "MOV", Ad, Dst, None, Var),
    row!(Not, "NOT", Ad, Dst, None, Var),
    row!(Unm, "UNM", Ad, Dst, None, Var),
    row!(Len, "LEN", Ad, Dst, None, Var),
    row!(AddVN, "ADDVN", Abc, Dst, Var, Num),
    row!(SubVN, "SUBVN", Abc, Dst, Var, Num),
    row!(MulVN, "MULVN", Abc, Dst, Var, Num),
    row!(DivVN, "DIVVN", Abc, Dst, Var, Num),
    row!(ModVN, "MODVN", Abc, Dst, Var, Num),
    row!(AddNV, "ADDNV", Abc, Dst, Var, Num),
    row!(SubNV, "SUBNV", Abc, Dst, Var, Num),
    row!(MulNV, "MULNV", Abc, Dst, Var, Num),
    row!(DivNV, "DIVNV", Abc, Dst, Var, Num),
    row!(ModNV, "MODNV", Abc, Dst, Var, Num),
    row!(AddVV, "ADDVV", Abc, Dst, Var, Var),
    row!(SubVV, "SUBVV", Abc, Dst, Var, Var),
    row!(MulVV, "MULVV", Abc, Dst, Var, Var),
    row!(DivVV, "DIVVV", Abc, Dst, Var, Var),
    row!(ModVV, "MODVV", Abc, Dst, Var, Var),
    row!(Pow, "POW", Abc, Dst, Var, Var),
    row!(Cat, "CAT", Abc, Dst, RBase, RBase),
    row!(KStr, "KSTR", Ad, Dst, None, Str),
    row!(KCData, "KCDATA", Ad, Dst, None, CData),
    row!(KShort, "KSHORT", Ad, Dst, None, SLit),
    row!(KNum, "KNUM", Ad, Dst, None, Num),
    row!(KPri, "KPRI", Ad, Dst, None, Pri),
    row!(KNil, "KNIL", Ad, Base, None, Base),
    row!(UGet, "UGET", Ad, Dst, None, Uv),
    row!(USetV, "USETV", Ad, Uv, None, Var),
    row!(USetS, "USETS", Ad, Uv, None, Str),
    row!(USetN, "USETN", Ad, Uv, None, Num),
    row!(USetP, "USETP", Ad, Uv, None, Pri),
    row!(UClo, "UCLO", Aj, RBase, None, Jump),
    row!(FNew, "FNEW", Ad, Dst, None, Func),
    row!(TNew, "TNEW", Ad, Dst, None, Lit),
    row!(TDup, "TDUP", Ad, Dst, None, Tab),
    row!(GGet, "GGET", Ad, Dst, None, Str),
    row!(GSet, "GSET", Ad, Var, None, Str),
    row!(TGetV, "TGETV", Abc, Dst, Var, Var),
    row!(TGetS, "TGETS", Abc, Dst, Var, Str),
    row!(TGetB, "TGETB", Abc, Dst, Var, Lit),
    row!(TSetV, "TSETV", Abc, Var, Var, Var),
    row!(TSetS, "TSETS", Abc, Var, Var, Str),
    row!(TSetB, "TSETB", Abc, Var, Var, Lit),
    row!(TSetM, "TSETM", Ad, Base, None, Num),
    row!(CallM, "CALLM", Abc, Base, Lit, Lit),
    row!(Call, "CALL", Abc, Base, Lit, Lit),
    row!(CallMT, "CALLMT", Ad, Base, None, Lit),
    row!(CallT, "CALLT", Ad, Base, None, Lit),
    row!(IterC, "ITERC", Abc, Base, Lit, Lit),
    row!(IterN, "ITERN", Abc, Base, Lit, Lit),
    row!(VarG, "VARG", Abc, Base, Lit, Lit),
    row!(IsNext, "ISNEXT", Aj, Base, None, Jump),
    row!(RetM, "RETM", Ad, Base, None, Lit),
    row!(Ret, "RET", Ad, RBase, None, Lit),
    row!(Ret0, "RET0", Ad, RBase, None, Lit),
    row!(Ret1, "RET1", Ad, RBase, None, Lit),
    row!(ForI, "FORI", Aj, Base, None, Jump),
    row!(JForI, "JFORI", Aj, Base, None, Jump),
    row!(ForL, "FORL", Aj, Base, None, Jump),
    row!(IForL, "IFORL", Aj, Base, None, Jump),
    row!(JForL, "JFORL", Ad, Base, None, Lit),
    row!(IterL, "ITERL", Aj, Base, None, Jump),
    row!(IIterL, "IITERL", Aj, Base, None, Jump),
    row!(JIterL, "JITERL", Ad, Base, None, Lit),
    row!(Loop, "LOOP", Aj, RBase, None, Jump),
    row!(ILoop, "ILOOP", Aj, RBase, None, Jump),
    row!(JLoop, "JLOOP", Ad, RBase, None, Lit),
    row!(Jmp, "JMP", Aj, RBase, None, Jump),
    row!(FuncF, "FUNCF", Ad, RBase, None, None),
    row!(IFuncF, "IFUNCF", Ad, RBase, None, None),
    row!(JFuncF, "JFUNCF", Ad, RBase, None, Lit),
    row!(FuncV, "FUNCV", Ad, RBase, None, None),
    row!(IFuncV, "IFUNCV", Ad, RBase, None, None),
    row!(JFuncV, "JFUNCV", Ad, RBase, None, Lit),
    row!(FuncC, "FUNCC", Ad, RBase, None, None),
    row!(FuncCW, "FUNCCW", Ad, RBase, None, None),
];
