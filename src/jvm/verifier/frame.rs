use super::*;
use crate::jvm::bytecode::{BranchInstruction, Instruction, InvokeType};
use crate::jvm::class_file::{
    ClassConstantIndex, ClassFile, Constant, ConstantIndex, ConstantKind, FieldRefConstantIndex,
    MethodRefConstantIndex, Version,
};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::descriptors::{ParseDescriptor, RenderDescriptor};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, Name, RefType, UnqualifiedName,
    VerifierErrorKind, MAX_ARRAY_DIMENSIONS,
};
use crate::util::{OffsetVec, Width};
use std::collections::HashMap;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals are a fixed array of `max_locals` slots, where a `long` or `double` in slot `n` leaves
/// `Top` in slot `n + 1`. The stack is an [`OffsetVec`] so that its total width can be compared
/// against `max_stack`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: Vec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,

    /// Inside a constructor, `this` has not yet been through a superclass or sibling `<init>`
    pub flag_this_uninit: bool,
}

/// Frame tracked during verification
pub type VerifierFrame = Frame<RefType<BinaryName>, u16>;

type VType = VerifierType;

/// Everything about the method and its class that instructions need to be checked
pub struct VerifierContext<'a> {
    pub class: &'a ClassFile,
    pub this_class: BinaryName,

    /// Direct superclass (absent only for `java/lang/Object`)
    pub superclass: Option<BinaryName>,
    pub return_type: Option<FieldType<BinaryName>>,
    pub is_constructor: bool,
    pub max_stack: u16,

    /// Class named by each `new` instruction, keyed by the offset of the instruction
    pub new_sites: HashMap<u16, BinaryName>,
    pub hierarchy: &'a dyn ClassHierarchy,
}

impl<'a> VerifierContext<'a> {
    fn this_type(&self) -> VType {
        VerificationType::Object(RefType::Object(self.this_class.clone()))
    }
}

impl VerifierFrame {
    /// Frame on entry to a method, with the arguments in the first locals
    pub fn method_entry(
        ctx: &VerifierContext<'_>,
        is_static: bool,
        descriptor: &MethodDescriptor<BinaryName>,
        max_locals: u16,
    ) -> Result<VerifierFrame, VerifierErrorKind> {
        let mut locals = vec![VerificationType::Top; max_locals as usize];
        let mut flag_this_uninit = false;

        let mut arguments: Vec<VType> = vec![];
        if !is_static {
            if ctx.is_constructor && ctx.this_class != BinaryName::OBJECT {
                arguments.push(VerificationType::UninitializedThis);
                flag_this_uninit = true;
            } else {
                arguments.push(ctx.this_type());
            }
        }
        arguments.extend(descriptor.parameters.iter().cloned().map(VType::from));

        let mut next_local = 0;
        for argument in arguments {
            let width = argument.width();
            if next_local + width > locals.len() {
                return Err(VerifierErrorKind::ArgumentsExceedLocals);
            }
            locals[next_local] = argument;
            next_local += width;
        }

        Ok(Frame {
            locals,
            stack: OffsetVec::new(),
            flag_this_uninit,
        })
    }

    /// Update the frame to reflect the effects of the given (non-branching) instruction
    pub fn verify_instruction(
        &mut self,
        insn: &Instruction,
        insn_offset: u16,
        ctx: &VerifierContext<'_>,
    ) -> Result<(), VerifierErrorKind> {
        verify_instruction(self, ctx, insn, insn_offset)?;

        // Pops always come before pushes, so the final height is the largest one
        if self.stack.total_width() > ctx.max_stack as usize {
            return Err(VerifierErrorKind::StackOverflow {
                max_stack: ctx.max_stack,
            });
        }
        Ok(())
    }

    /// Update the frame to reflect the effects of the given branching instruction
    pub fn verify_branch_instruction(
        &mut self,
        insn: &BranchInstruction,
        ctx: &VerifierContext<'_>,
    ) -> Result<(), VerifierErrorKind> {
        verify_branch_instruction(self, ctx, insn)
    }

    /// Merge a frame flowing into the same instruction as this one
    ///
    /// Locals which disagree become `Top`, while stacks must agree in height and merge to
    /// something other than `Top`. Returns whether this frame was changed.
    pub fn merge_from(
        &mut self,
        incoming: &VerifierFrame,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, VerifierErrorKind> {
        if self.stack.len() != incoming.stack.len() {
            return Err(VerifierErrorKind::InconsistentStackHeight {
                expected: self.stack.len(),
                found: incoming.stack.len(),
            });
        }

        let mut changed = false;
        let mut stack = OffsetVec::new();
        for ((_, _, existing), (_, _, other)) in self.stack.iter().zip(incoming.stack.iter()) {
            let merged = VType::merge(existing, other, hierarchy)?;
            if merged == VerificationType::Top {
                return Err(VerifierErrorKind::MismatchedStackTypes {
                    first: existing.clone(),
                    second: other.clone(),
                });
            }
            changed |= &merged != existing;
            stack.push(merged);
        }
        self.stack = stack;

        for (existing, other) in self.locals.iter_mut().zip(incoming.locals.iter()) {
            let merged = VType::merge(existing, other, hierarchy)?;
            if &merged != existing {
                changed = true;
                *existing = merged;
            }
        }

        if incoming.flag_this_uninit && !self.flag_this_uninit {
            self.flag_this_uninit = true;
            changed = true;
        }

        Ok(changed)
    }
}

fn verify_instruction(
    frame: &mut VerifierFrame,
    ctx: &VerifierContext<'_>,
    insn: &Instruction,
    insn_offset: u16,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame {
        locals,
        stack,
        flag_this_uninit,
    } = frame;

    match insn {
        Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => {
            stack.push(Long);
        }
        FConst0 | FConst1 | FConst2 => {
            stack.push(Float);
        }
        DConst0 | DConst1 => {
            stack.push(Double);
        }
        BiPush(_) | SiPush(_) => {
            stack.push(Integer);
        }
        Ldc(constant) => {
            stack.push(loadable_type(ctx, *constant, 1)?);
        }
        Ldc2(constant) => {
            stack.push(loadable_type(ctx, *constant, 2)?);
        }

        ILoad(offset) => {
            get_local_expecting_type(locals, *offset, &Integer)?;
            stack.push(Integer);
        }
        LLoad(offset) => {
            get_local_expecting_type(locals, *offset, &Long)?;
            stack.push(Long);
        }
        FLoad(offset) => {
            get_local_expecting_type(locals, *offset, &Float)?;
            stack.push(Float);
        }
        DLoad(offset) => {
            get_local_expecting_type(locals, *offset, &Double)?;
            stack.push(Double);
        }
        ALoad(offset) => {
            let typ = get_local(locals, *offset)?;
            if !typ.is_reference() {
                return Err(VerifierErrorKind::InvalidType(typ));
            }
            stack.push(typ);
        }

        IALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Int])?;
            stack.push(Integer);
        }
        LALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Long])?;
            stack.push(Long);
        }
        FALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Float])?;
            stack.push(Float);
        }
        DALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Double])?;
            stack.push(Double);
        }
        AALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            let array_type = pop_offset_vec(stack)?;
            let element_type = match &array_type {
                Null => Null,
                Object(ref_type) => match ref_type.component_type() {
                    Some(FieldType::Ref(component)) => Object(component),
                    _ => return Err(VerifierErrorKind::NotArrayType(array_type)),
                },
                _ => return Err(VerifierErrorKind::NotArrayType(array_type)),
            };
            stack.push(element_type);
        }
        BALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Byte, BaseType::Boolean])?;
            stack.push(Integer);
        }
        CALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Char])?;
            stack.push(Integer);
        }
        SALoad => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Short])?;
            stack.push(Integer);
        }

        IStore(offset) => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            update_local_type(locals, *offset, Integer)?;
        }
        FStore(offset) => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            update_local_type(locals, *offset, Float)?;
        }
        LStore(offset) => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            update_local_type(locals, *offset, Long)?;
        }
        DStore(offset) => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            update_local_type(locals, *offset, Double)?;
        }
        AStore(offset) => {
            let popped_type = pop_offset_vec(stack)?;
            if !popped_type.is_reference() && !matches!(popped_type, ReturnAddress(_)) {
                return Err(VerifierErrorKind::InvalidType(popped_type));
            }
            update_local_type(locals, *offset, popped_type)?;
        }

        IAStore => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Int])?;
        }
        LAStore => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Long])?;
        }
        FAStore => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Float])?;
        }
        DAStore => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Double])?;
        }
        AAStore => {
            // Element assignability is checked at runtime (`ArrayStoreException`)
            pop_initialized_reference(stack)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            let array_type = pop_offset_vec(stack)?;
            match &array_type {
                Null => (),
                Object(ref_type) => match ref_type.component_type() {
                    Some(FieldType::Ref(_)) => (),
                    _ => return Err(VerifierErrorKind::NotArrayType(array_type)),
                },
                _ => return Err(VerifierErrorKind::NotArrayType(array_type)),
            }
        }
        BAStore => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Byte, BaseType::Boolean])?;
        }
        CAStore => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Char])?;
        }
        SAStore => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Short])?;
        }

        Pop => {
            let _ = pop_offset_vec_expecting_width(stack, 1)?;
        }

        Pop2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let _ = pop_offset_vec_expecting_width(stack, 1)?;
                }

                // Form 2
                2 => (),

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg1);
        }

        DupX1 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }

        DupX2 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2X1 => {
            let arg1 = pop_offset_vec(stack)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2X2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    let arg3 = pop_offset_vec(stack)?;
                    match arg3.width() {
                        // Form 1
                        1 => {
                            let arg4 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg4);
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 3
                        2 => {
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                2 => {
                    let arg2 = pop_offset_vec(stack)?;
                    match arg2.width() {
                        // Form 2
                        1 => {
                            let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 4
                        2 => {
                            stack.push(arg1.clone());
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Swap => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Integer);
        }

        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Long);
        }

        FAdd | FSub | FDiv | FMul | FRem => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            pop_offset_vec_expecting_type(stack, &Float)?;
            stack.push(Float);
        }

        DAdd | DSub | DDiv | DMul | DRem => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            pop_offset_vec_expecting_type(stack, &Double)?;
            stack.push(Double);
        }

        INeg | I2B | I2C | I2S => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Integer);
        }

        LNeg => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Long);
        }

        FNeg => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            stack.push(Float);
        }

        DNeg => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            stack.push(Double);
        }

        LSh(_) => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Long);
        }

        IInc(offset, _) => {
            get_local_expecting_type(locals, *offset, &Integer)?;
        }

        I2L => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Long);
        }
        I2F => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Float);
        }
        I2D => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Double);
        }

        L2I => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Integer);
        }
        L2F => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Float);
        }
        L2D => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Double);
        }

        F2I => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            stack.push(Integer);
        }
        F2L => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            stack.push(Long);
        }
        F2D => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            stack.push(Double);
        }

        D2I => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            stack.push(Integer);
        }
        D2L => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            stack.push(Long);
        }
        D2F => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            stack.push(Float);
        }

        LCmp => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            pop_offset_vec_expecting_type(stack, &Long)?;
            stack.push(Integer);
        }
        FCmp(_) => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            pop_offset_vec_expecting_type(stack, &Float)?;
            stack.push(Integer);
        }
        DCmp(_) => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            pop_offset_vec_expecting_type(stack, &Double)?;
            stack.push(Integer);
        }

        GetStatic(field) => {
            let field = resolve_field(ctx, *field)?;
            stack.push(VType::from(field.descriptor));
        }
        PutStatic(field) => {
            let field = resolve_field(ctx, *field)?;
            pop_offset_vec_expecting_assignable(stack, &VType::from(field.descriptor), ctx)?;
        }
        GetField(field) => {
            let field = resolve_field(ctx, *field)?;
            let object_type = Object(field.class);
            pop_offset_vec_expecting_assignable(stack, &object_type, ctx)?;
            stack.push(VType::from(field.descriptor));
        }
        PutField(field) => {
            let field = resolve_field(ctx, *field)?;
            pop_offset_vec_expecting_assignable(stack, &VType::from(field.descriptor), ctx)?;

            // Constructors may assign their own fields before calling the super constructor
            let receiver = pop_offset_vec(stack)?;
            let own_field = field.class == RefType::Object(ctx.this_class.clone())
                && declares_field(ctx.class, &field.name, &field.raw_descriptor);
            if !(receiver == UninitializedThis && own_field) {
                expect_assignable(receiver, &Object(field.class), ctx)?;
            }
        }

        Invoke(invoke_type, method) => {
            let method = resolve_method(ctx, *invoke_type, *method)?;
            let is_init = method.name == UnqualifiedName::INIT.as_str();
            let desc = &method.descriptor;

            if let InvokeType::Interface(count) = invoke_type {
                if *count as usize != desc.parameter_length(true) {
                    return Err(VerifierErrorKind::BadInvokeOperands);
                }
            }

            // Check that all the arguments match
            for expected_arg_type in desc.parameters.iter().rev() {
                let expected = VType::from(expected_arg_type.clone());
                pop_offset_vec_expecting_assignable(stack, &expected, ctx)?;
            }

            if let (InvokeType::Special, true) = (invoke_type, is_init) {
                if desc.return_type.is_some() {
                    return Err(VerifierErrorKind::BadInitCall);
                }
                let initialized_class = match &method.class {
                    RefType::Object(class) => class.clone(),
                    _ => return Err(VerifierErrorKind::BadInitCall),
                };

                // Initialize
                match pop_offset_vec(stack)? {
                    UninitializedThis => {
                        let is_this_or_super = initialized_class == ctx.this_class
                            || Some(&initialized_class) == ctx.superclass.as_ref();
                        if !is_this_or_super {
                            return Err(VerifierErrorKind::BadInitCall);
                        }
                        replace_all(locals, stack, &UninitializedThis, &ctx.this_type());
                        *flag_this_uninit = false;
                    }

                    uninitialized @ Uninitialized(new_offset) => {
                        if ctx.new_sites.get(&new_offset) != Some(&initialized_class) {
                            return Err(VerifierErrorKind::BadInitCall);
                        }
                        let initialized = Object(RefType::Object(initialized_class));
                        replace_all(locals, stack, &uninitialized, &initialized);
                    }

                    _ => return Err(VerifierErrorKind::BadInitCall),
                }
            } else {
                // Pop off the receiver type
                match invoke_type {
                    InvokeType::Static => (),
                    InvokeType::Special => {
                        let receiver = pop_offset_vec(stack)?;
                        expect_assignable(receiver, &ctx.this_type(), ctx)?;
                    }
                    InvokeType::Virtual | InvokeType::Interface(_) => {
                        let receiver = pop_offset_vec(stack)?;
                        expect_assignable(receiver, &Object(method.class.clone()), ctx)?;
                    }
                }

                // Push the return type
                if let Some(return_type) = &desc.return_type {
                    stack.push(VType::from(return_type.clone()));
                }
            }
        }

        InvokeDynamic(invoke_dynamic) => {
            let index = invoke_dynamic.0;
            let (name, descriptor) = match constant(ctx, index)? {
                Constant::InvokeDynamic {
                    method_descriptor, ..
                } => ctx
                    .class
                    .constants
                    .get_name_and_type(*method_descriptor)
                    .map_err(|_| VerifierErrorKind::InvalidConstantIndex(index.0))?,
                other => {
                    return Err(VerifierErrorKind::WrongConstantKind {
                        index: index.0,
                        found: other.kind(),
                    })
                }
            };
            if name.starts_with('<') {
                return Err(VerifierErrorKind::IllegalInternalMethodCall(name.to_owned()));
            }
            let descriptor = parse_method_descriptor(descriptor)?;

            // Check that all the arguments match
            for expected_arg_type in descriptor.parameters.iter().rev() {
                let expected = VType::from(expected_arg_type.clone());
                pop_offset_vec_expecting_assignable(stack, &expected, ctx)?;
            }

            // Push the return type
            if let Some(return_type) = descriptor.return_type {
                stack.push(VType::from(return_type));
            }
        }

        New(class) => match class_type(ctx, *class)? {
            RefType::Object(_) => {
                stack.push(Uninitialized(insn_offset));
            }
            array_type => return Err(VerifierErrorKind::BadNew(array_type.render())),
        },
        NewArray(base_type) => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(class) => {
            let array_type = RefType::array(FieldType::Ref(class_type(ctx, *class)?));
            if array_type.dimensions() > MAX_ARRAY_DIMENSIONS {
                return Err(VerifierErrorKind::BadArrayDimensions);
            }
            pop_offset_vec_expecting_type(stack, &Integer)?;
            stack.push(Object(array_type));
        }
        MultiANewArray(class, dimensions) => {
            let array_type = class_type(ctx, *class)?;
            if *dimensions == 0 || array_type.dimensions() < *dimensions as usize {
                return Err(VerifierErrorKind::BadArrayDimensions);
            }
            for _ in 0..*dimensions {
                pop_offset_vec_expecting_type(stack, &Integer)?;
            }
            stack.push(Object(array_type));
        }
        ArrayLength => {
            let array_type = pop_offset_vec(stack)?;
            match &array_type {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                _ => return Err(VerifierErrorKind::NotArrayType(array_type)),
            }
            stack.push(Integer);
        }

        CheckCast(class) => {
            let target_type = class_type(ctx, *class)?;
            pop_initialized_reference(stack)?;
            stack.push(Object(target_type));
        }
        InstanceOf(class) => {
            class_type(ctx, *class)?;
            pop_initialized_reference(stack)?;
            stack.push(Integer);
        }

        MonitorEnter | MonitorExit => {
            pop_initialized_reference(stack)?;
        }
    }

    Ok(())
}

fn verify_branch_instruction(
    frame: &mut VerifierFrame,
    ctx: &VerifierContext<'_>,
    insn: &BranchInstruction,
) -> Result<(), VerifierErrorKind> {
    use BranchInstruction::*;
    use VerificationType::*;

    let Frame {
        stack,
        locals,
        flag_this_uninit,
    } = frame;
    let return_type = &ctx.return_type;

    match insn {
        If(_, _) => pop_offset_vec_expecting_type(stack, &Integer)?,
        IfICmp(_, _) => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            pop_offset_vec_expecting_type(stack, &Integer)?;
        }
        IfACmp(_, _) => {
            for _ in 0..2 {
                let atype = pop_offset_vec(stack)?;
                if !atype.is_reference() {
                    return Err(VerifierErrorKind::InvalidType(atype));
                }
            }
        }
        IfNull(_, _) => {
            let atype = pop_offset_vec(stack)?;
            if !atype.is_reference() {
                return Err(VerifierErrorKind::InvalidType(atype));
            }
        }
        Goto(_) => (),
        Jsr(entry) => {
            stack.push(ReturnAddress(*entry));
            if stack.total_width() > ctx.max_stack as usize {
                return Err(VerifierErrorKind::StackOverflow {
                    max_stack: ctx.max_stack,
                });
            }
        }
        Ret(offset) => match get_local(locals, *offset)? {
            ReturnAddress(_) => (),
            other => return Err(VerifierErrorKind::InvalidType(other)),
        },
        TableSwitch { .. } | LookupSwitch { .. } => {
            pop_offset_vec_expecting_type(stack, &Integer)?
        }
        IReturn => {
            pop_offset_vec_expecting_type(stack, &Integer)?;
            match return_type {
                Some(FieldType::Base(BaseType::Int))
                | Some(FieldType::Base(BaseType::Char))
                | Some(FieldType::Base(BaseType::Short))
                | Some(FieldType::Base(BaseType::Byte))
                | Some(FieldType::Base(BaseType::Boolean)) => (),
                _ => return Err(VerifierErrorKind::BadReturn),
            }
        }
        LReturn => {
            pop_offset_vec_expecting_type(stack, &Long)?;
            if *return_type != Some(FieldType::long()) {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        FReturn => {
            pop_offset_vec_expecting_type(stack, &Float)?;
            if *return_type != Some(FieldType::float()) {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        DReturn => {
            pop_offset_vec_expecting_type(stack, &Double)?;
            if *return_type != Some(FieldType::double()) {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        AReturn => {
            let expected = match return_type {
                Some(ret_type @ FieldType::Ref(_)) => VType::from(ret_type.clone()),
                _ => return Err(VerifierErrorKind::BadReturn),
            };
            pop_offset_vec_expecting_assignable(stack, &expected, ctx)?;
        }
        Return => {
            if return_type.is_some() {
                return Err(VerifierErrorKind::BadReturn);
            }
            if ctx.is_constructor && *flag_this_uninit {
                return Err(VerifierErrorKind::UninitializedThisOnReturn);
            }
        }
        AThrow => {
            let throwable = Object(RefType::Object(BinaryName::THROWABLE));
            pop_offset_vec_expecting_assignable(stack, &throwable, ctx)?;
        }
    }

    Ok(())
}

/// Field reference, as seen from the bytecode
struct ResolvedField {
    class: RefType<BinaryName>,
    name: String,
    raw_descriptor: String,
    descriptor: FieldType<BinaryName>,
}

/// Method reference, as seen from the bytecode
struct ResolvedMethod<'a> {
    class: RefType<BinaryName>,
    name: &'a str,
    descriptor: MethodDescriptor<BinaryName>,
}

fn constant<'a>(
    ctx: &VerifierContext<'a>,
    index: ConstantIndex,
) -> Result<&'a Constant, VerifierErrorKind> {
    ctx.class
        .constants
        .get(index)
        .map_err(|_| VerifierErrorKind::InvalidConstantIndex(index.0))
}

fn class_type(
    ctx: &VerifierContext<'_>,
    index: ClassConstantIndex,
) -> Result<RefType<BinaryName>, VerifierErrorKind> {
    let name = match constant(ctx, index.0)? {
        Constant::Class(_) => ctx
            .class
            .constants
            .get_class_name(index)
            .map_err(|_| VerifierErrorKind::InvalidConstantIndex(index.0 .0))?,
        other => {
            return Err(VerifierErrorKind::WrongConstantKind {
                index: index.0 .0,
                found: other.kind(),
            })
        }
    };
    RefType::from_class_constant(name)
        .map_err(|_| VerifierErrorKind::BadDescriptor(name.to_owned()))
}

fn resolve_field(
    ctx: &VerifierContext<'_>,
    index: FieldRefConstantIndex,
) -> Result<ResolvedField, VerifierErrorKind> {
    let class = match constant(ctx, index.0)? {
        Constant::FieldRef(class, _) => *class,
        other => {
            return Err(VerifierErrorKind::WrongConstantKind {
                index: index.0 .0,
                found: other.kind(),
            })
        }
    };
    let member = ctx
        .class
        .constants
        .get_member_ref(index)
        .map_err(|_| VerifierErrorKind::InvalidConstantIndex(index.0 .0))?;
    let descriptor = FieldType::parse(member.descriptor)
        .map_err(|_| VerifierErrorKind::BadDescriptor(member.descriptor.to_owned()))?;
    Ok(ResolvedField {
        class: class_type(ctx, class)?,
        name: member.name.to_owned(),
        raw_descriptor: member.descriptor.to_owned(),
        descriptor,
    })
}

fn resolve_method<'a>(
    ctx: &VerifierContext<'a>,
    invoke_type: InvokeType,
    index: MethodRefConstantIndex,
) -> Result<ResolvedMethod<'a>, VerifierErrorKind> {
    let (class, is_interface) = match constant(ctx, index.0)? {
        Constant::MethodRef {
            class,
            is_interface,
            ..
        } => (*class, *is_interface),
        other => {
            return Err(VerifierErrorKind::WrongConstantKind {
                index: index.0 .0,
                found: other.kind(),
            })
        }
    };

    // Interface method references from `invokestatic`/`invokespecial` are only allowed from 8
    let kind_ok = match invoke_type {
        InvokeType::Virtual => !is_interface,
        InvokeType::Interface(_) => is_interface,
        InvokeType::Static | InvokeType::Special => {
            !is_interface || ctx.class.version >= Version::JAVA8
        }
    };
    if !kind_ok {
        let found = if is_interface {
            ConstantKind::InterfaceMethodRef
        } else {
            ConstantKind::MethodRef
        };
        return Err(VerifierErrorKind::WrongConstantKind {
            index: index.0 .0,
            found,
        });
    }

    let member = ctx
        .class
        .constants
        .get_member_ref(index)
        .map_err(|_| VerifierErrorKind::InvalidConstantIndex(index.0 .0))?;
    let is_init = member.name == UnqualifiedName::INIT.as_str();
    if member.name.starts_with('<') && !(is_init && invoke_type == InvokeType::Special) {
        return Err(VerifierErrorKind::IllegalInternalMethodCall(
            member.name.to_owned(),
        ));
    }

    Ok(ResolvedMethod {
        class: class_type(ctx, class)?,
        name: member.name,
        descriptor: parse_method_descriptor(member.descriptor)?,
    })
}

fn parse_method_descriptor(
    descriptor: &str,
) -> Result<MethodDescriptor<BinaryName>, VerifierErrorKind> {
    MethodDescriptor::parse(descriptor)
        .map_err(|_| VerifierErrorKind::BadDescriptor(descriptor.to_owned()))
}

/// Type pushed by `ldc`, `ldc_w`, or `ldc2_w`
fn loadable_type(
    ctx: &VerifierContext<'_>,
    index: ConstantIndex,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let object = |name: BinaryName| VerificationType::Object(RefType::Object(name));
    let typ = match constant(ctx, index)? {
        Constant::Integer(_) => VerificationType::Integer,
        Constant::Float(_) => VerificationType::Float,
        Constant::Long(_) => VerificationType::Long,
        Constant::Double(_) => VerificationType::Double,
        Constant::String(_) => object(BinaryName::STRING),
        Constant::Class(_) => object(BinaryName::CLASS),
        Constant::MethodHandle { .. } => object(BinaryName::METHODHANDLE),
        Constant::MethodType { .. } => object(BinaryName::METHODTYPE),
        Constant::Dynamic { name_and_type, .. } => {
            let (_, descriptor) = ctx
                .class
                .constants
                .get_name_and_type(*name_and_type)
                .map_err(|_| VerifierErrorKind::InvalidConstantIndex(index.0))?;
            let field_type = FieldType::parse(descriptor)
                .map_err(|_| VerifierErrorKind::BadDescriptor(descriptor.to_owned()))?;
            VType::from(field_type)
        }
        other => return Err(VerifierErrorKind::NotLoadableConstant(other.kind())),
    };
    if typ.width() != expected_width {
        return Err(VerifierErrorKind::InvalidWidth(typ.width()));
    }
    Ok(typ)
}

fn declares_field(class: &ClassFile, name: &str, descriptor: &str) -> bool {
    class.fields.iter().any(|field| {
        field.name(&class.constants).ok() == Some(name)
            && field.descriptor(&class.constants).ok() == Some(descriptor)
    })
}

/// Replace every occurrence of a type in the stack and locals
fn replace_all(
    locals: &mut [VType],
    stack: &mut OffsetVec<VType>,
    original: &VType,
    updated: &VType,
) {
    for local in locals.iter_mut() {
        if local == original {
            *local = updated.clone();
        }
    }
    stack.map_in_place(|typ| {
        if typ == original {
            Some(updated.clone())
        } else {
            None
        }
    });
}

fn get_local(locals: &[VType], offset: u16) -> Result<VType, VerifierErrorKind> {
    locals
        .get(offset as usize)
        .cloned()
        .ok_or(VerifierErrorKind::InvalidLocalIndex(offset))
}

fn get_local_expecting_type(
    locals: &[VType],
    offset: u16,
    expected_type: &VType,
) -> Result<(), VerifierErrorKind> {
    let found = get_local(locals, offset)?;
    if &found == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found,
            expected: expected_type.clone(),
        })
    }
}

/// Store into a local, clobbering whatever wide value it overlapped with
fn update_local_type(
    locals: &mut [VType],
    offset: u16,
    new_type: VType,
) -> Result<(), VerifierErrorKind> {
    let index = offset as usize;
    if index + new_type.width() > locals.len() {
        return Err(VerifierErrorKind::InvalidLocalIndex(offset));
    }
    if index > 0 && locals[index - 1].width() == 2 {
        locals[index - 1] = VerificationType::Top;
    }
    if new_type.width() == 2 {
        locals[index + 1] = VerificationType::Top;
    }
    locals[index] = new_type;
    Ok(())
}

fn pop_offset_vec(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VType>,
    expected_type: &VType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if &typ == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found: typ,
            expected: expected_type.clone(),
        })
    }
}

fn pop_offset_vec_expecting_assignable(
    stack: &mut OffsetVec<VType>,
    expected_type: &VType,
    ctx: &VerifierContext<'_>,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    expect_assignable(typ, expected_type, ctx)
}

fn expect_assignable(
    found: VType,
    expected_type: &VType,
    ctx: &VerifierContext<'_>,
) -> Result<(), VerifierErrorKind> {
    if VType::is_assignable(&found, expected_type, ctx.hierarchy)? {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found,
            expected: expected_type.clone(),
        })
    }
}

fn pop_initialized_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    match typ {
        VerificationType::Null | VerificationType::Object(_) => Ok(typ),
        _ => Err(VerifierErrorKind::InvalidType(typ)),
    }
}

/// Pop a one-dimensional array of one of the given primitive types (or `null`)
fn pop_primitive_array(
    stack: &mut OffsetVec<VType>,
    element_types: &[BaseType],
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let matches = match &typ {
        VerificationType::Null => true,
        VerificationType::Object(RefType::PrimitiveArray(arr)) => {
            arr.additional_dimensions == 0 && element_types.contains(&arr.element_type)
        }
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found: typ,
            expected: VerificationType::Object(RefType::array(FieldType::Base(
                element_types[0],
            ))),
        })
    }
}
