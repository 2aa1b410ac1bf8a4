//! Decode ISA binaries into GLSL without any external tools.
use std::collections::BTreeSet;

use tbx_lib::{
    isa::{DestinationKind, Instruction, IsaBinary, Opcode, OperandKind},
    ShaderStage,
};

use crate::{
    archive::StageBinary,
    error::TranslateError,
    graph::{BinaryOp, Expr, Graph, Node, Output, UnaryOp},
    reflection::StageReflection,
};

use super::{external::sampler_name, TranslatedStage};

const CHANNELS: [char; 4] = ['x', 'y', 'z', 'w'];

/// Scratch register for instructions that read and write the same register.
const TEMP: &str = "tmp";

pub fn translate_isa(binary: &StageBinary) -> Result<TranslatedStage, TranslateError> {
    let isa = IsaBinary::from_bytes(binary.bytes)?;
    if isa.header.stage != binary.stage {
        return Err(TranslateError::StageMismatch {
            expected: binary.stage,
            actual: isa.header.stage,
        });
    }

    let graph = decode_graph(&isa);
    let reflection = StageReflection::from_graph(&graph);
    let source = write_glsl(&isa, &graph);
    Ok(TranslatedStage {
        source,
        reflection: Some(reflection),
    })
}

/// Convert each written channel of each instruction into a [Node].
pub fn decode_graph(binary: &IsaBinary) -> Graph {
    let stage = binary.header.stage;
    let mut graph = Graph::default();

    for instruction in executed_instructions(&binary.instructions) {
        let values: Vec<_> = (0..4)
            .filter(|c| instruction.writes_channel(*c))
            .filter_map(|c| Some((c, channel_expr(&graph, stage, instruction, c)?)))
            .collect();

        let name = destination_name(stage, instruction);

        let reads_destination = instruction.dst_kind() == DestinationKind::Register
            && instruction
                .operands()
                .contains(&(OperandKind::Register, instruction.dst() as u32));

        if reads_destination {
            // Write all channels to a temporary first to avoid reading already modified channels.
            let temps: Vec<_> = values
                .into_iter()
                .map(|(c, input)| {
                    graph.nodes.push(Node {
                        output: Output {
                            name: TEMP.to_string(),
                            channel: Some(CHANNELS[c]),
                        },
                        input,
                    });
                    (c, graph.nodes.len() - 1)
                })
                .collect();

            for (c, node_index) in temps {
                graph.nodes.push(Node {
                    output: Output {
                        name: name.clone(),
                        channel: Some(CHANNELS[c]),
                    },
                    input: Expr::Node {
                        node_index,
                        channel: Some(CHANNELS[c]),
                    },
                });
            }
        } else {
            for (c, input) in values {
                graph.nodes.push(Node {
                    output: Output {
                        name: name.clone(),
                        channel: Some(CHANNELS[c]),
                    },
                    input,
                });
            }
        }
    }

    graph
}

fn executed_instructions(instructions: &[Instruction]) -> impl Iterator<Item = &Instruction> {
    instructions
        .iter()
        .take_while(|i| i.opcode() != Opcode::End)
        .filter(|i| i.opcode() != Opcode::Nop)
}

fn channel_expr(
    graph: &Graph,
    stage: ShaderStage,
    i: &Instruction,
    channel: usize,
) -> Option<Expr> {
    let a = |c: usize| {
        operand(
            graph,
            i.src_a_kind(),
            i.src_a().value() as u32,
            i.swizzle_a_channel(c),
            i.negate_a(),
        )
    };
    let b = |c: usize| {
        operand(
            graph,
            i.src_b_kind(),
            i.src_b().value() as u32,
            i.swizzle_b_channel(c),
            i.negate_b(),
        )
    };
    let binary = |op, c| Expr::Binary(op, Box::new(a(c)), Box::new(b(c)));
    let func = |name: &str, args| Expr::Func {
        name: name.to_string(),
        args,
        channel: None,
    };

    match i.opcode() {
        Opcode::Nop | Opcode::End => None,
        Opcode::Mov => Some(a(channel)),
        Opcode::Add => Some(binary(BinaryOp::Add, channel)),
        Opcode::Mul => Some(binary(BinaryOp::Mul, channel)),
        Opcode::Min => Some(func("min", vec![a(channel), b(channel)])),
        Opcode::Max => Some(func("max", vec![a(channel), b(channel)])),
        Opcode::Rcp => Some(Expr::Binary(
            BinaryOp::Div,
            Box::new(Expr::Float(1.0)),
            Box::new(a(channel)),
        )),
        Opcode::Rsq => Some(func("inversesqrt", vec![a(channel)])),
        Opcode::Dp4 => (0..4)
            .map(|c| binary(BinaryOp::Mul, c))
            .reduce(|sum, e| Expr::Binary(BinaryOp::Add, Box::new(sum), Box::new(e))),
        Opcode::Ldc => {
            let value = Expr::Parameter {
                name: format!("cb{}", i.src_a().value()),
                field: Some("data".to_string()),
                index: Some(Box::new(Expr::Int(i.src_b().value() as i32))),
                channel: Some(CHANNELS[i.swizzle_a_channel(channel)]),
            };
            Some(negate(value, i.negate_a()))
        }
        Opcode::Tex => Some(Expr::Func {
            name: "texture".to_string(),
            args: vec![
                Expr::Global {
                    name: sampler_name(stage, i.src_b().value() as u32),
                    channel: None,
                },
                func("vec2", vec![a(0), a(1)]),
            ],
            channel: Some(CHANNELS[i.swizzle_b_channel(channel)]),
        }),
    }
}

fn operand(graph: &Graph, kind: OperandKind, index: u32, channel: usize, negated: bool) -> Expr {
    let c = CHANNELS[channel];
    let value = match kind {
        OperandKind::Register => {
            let name = format!("R{index}");
            match graph.last_assignment(&name, Some(c)) {
                Some(node_index) => Expr::Node {
                    node_index,
                    channel: Some(c),
                },
                None => Expr::Global {
                    name,
                    channel: Some(c),
                },
            }
        }
        OperandKind::Input => Expr::Global {
            name: format!("in_attr{index}"),
            channel: Some(c),
        },
        OperandKind::Immediate => Expr::Float(index as f32),
    };
    negate(value, negated)
}

fn negate(value: Expr, negated: bool) -> Expr {
    if negated {
        Expr::Unary(UnaryOp::Negate, Box::new(value))
    } else {
        value
    }
}

fn destination_name(stage: ShaderStage, i: &Instruction) -> String {
    match (i.dst_kind(), stage, i.dst()) {
        (DestinationKind::Register, _, dst) => format!("R{dst}"),
        (DestinationKind::Output, ShaderStage::Vertex, 0) => "gl_Position".to_string(),
        (DestinationKind::Output, _, dst) => format!("out_attr{dst}"),
    }
}

#[derive(Default)]
struct Interface {
    constant_buffers: BTreeSet<u32>,
    samplers: BTreeSet<u32>,
    inputs: BTreeSet<u32>,
    outputs: BTreeSet<u32>,
}

impl Interface {
    fn new(stage: ShaderStage, instructions: &[Instruction]) -> Self {
        let mut interface = Self::default();
        for i in executed_instructions(instructions) {
            for (kind, index) in i.operands() {
                if kind == OperandKind::Input {
                    interface.inputs.insert(index);
                }
            }
            match i.opcode() {
                Opcode::Ldc => {
                    interface.constant_buffers.insert(i.src_a().value() as u32);
                }
                Opcode::Tex => {
                    interface.samplers.insert(i.src_b().value() as u32);
                }
                _ => (),
            }
            if i.dst_kind() == DestinationKind::Output
                && !(stage == ShaderStage::Vertex && i.dst() == 0)
            {
                interface.outputs.insert(i.dst() as u32);
            }
        }
        interface
    }
}

fn write_glsl(binary: &IsaBinary, graph: &Graph) -> String {
    let stage = binary.header.stage;
    let interface = Interface::new(stage, &binary.instructions);

    let mut glsl = "#version 450\n\n".to_string();

    for n in &interface.constant_buffers {
        glsl += &format!(
            "layout(std430, binding = {n}) readonly buffer CBUFFER_DATA_{n} {{\n    vec4 data[];\n}} cb{n};\n\n"
        );
    }

    let sections = [
        interface
            .samplers
            .iter()
            .map(|s| format!("uniform sampler2D {};\n", sampler_name(stage, *s)))
            .collect::<String>(),
        interface
            .inputs
            .iter()
            .map(|n| format!("layout(location = {n}) in vec4 in_attr{n};\n"))
            .collect(),
        interface
            .outputs
            .iter()
            .map(|n| format!("layout(location = {n}) out vec4 out_attr{n};\n"))
            .collect(),
    ];
    for section in sections.iter().filter(|s| !s.is_empty()) {
        glsl += section;
        glsl += "\n";
    }

    glsl += "void main() {\n";
    for r in 0..binary.header.register_count {
        glsl += &format!("    vec4 R{r} = vec4(0.0);\n");
    }
    if graph.nodes.iter().any(|n| n.output.name == TEMP) {
        glsl += &format!("    vec4 {TEMP} = vec4(0.0);\n");
    }
    for node in &graph.nodes {
        glsl += "    ";
        glsl += &graph.node_to_glsl(node);
    }
    glsl += "    return;\n}\n";

    glsl
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tbx_lib::{isa::IDENTITY_SWIZZLE, BinaryFlavor};

    use crate::reflection::ConstantAccess;

    fn instruction(
        opcode: Opcode,
        dst: u8,
        dst_mask: u8,
        dst_kind: DestinationKind,
        (src_a, src_a_kind, swizzle_a): (u16, OperandKind, u8),
        (src_b, src_b_kind, swizzle_b): (u16, OperandKind, u8),
    ) -> Instruction {
        use bilge::prelude::{u10, u4};
        Instruction::new(
            opcode,
            dst,
            u4::new(dst_mask),
            dst_kind,
            u10::new(src_a),
            src_a_kind,
            swizzle_a,
            false,
            u10::new(src_b),
            src_b_kind,
            swizzle_b,
            false,
        )
    }

    fn translate(stage: ShaderStage, instructions: Vec<Instruction>) -> TranslatedStage {
        let bytes = IsaBinary::new(stage, instructions).to_bytes().unwrap();
        translate_isa(&StageBinary {
            flavor: BinaryFlavor::Isa,
            stage,
            bytes: &bytes,
        })
        .unwrap()
    }

    const UNUSED: (u16, OperandKind, u8) = (0, OperandKind::Immediate, IDENTITY_SWIZZLE);

    #[test]
    fn translate_fragment_texture() {
        let translated = translate(
            ShaderStage::Fragment,
            vec![
                instruction(
                    Opcode::Ldc,
                    0,
                    0b1111,
                    DestinationKind::Register,
                    (1, OperandKind::Immediate, IDENTITY_SWIZZLE),
                    (2, OperandKind::Immediate, IDENTITY_SWIZZLE),
                ),
                instruction(
                    Opcode::Tex,
                    1,
                    0b0011,
                    DestinationKind::Register,
                    (0, OperandKind::Register, IDENTITY_SWIZZLE),
                    (0, OperandKind::Immediate, IDENTITY_SWIZZLE),
                ),
                instruction(
                    Opcode::Mul,
                    0,
                    0b0001,
                    DestinationKind::Output,
                    (1, OperandKind::Register, IDENTITY_SWIZZLE),
                    (0, OperandKind::Input, IDENTITY_SWIZZLE),
                ),
                instruction(Opcode::End, 0, 0, DestinationKind::Register, UNUSED, UNUSED),
                instruction(
                    Opcode::Mov,
                    1,
                    0b1111,
                    DestinationKind::Output,
                    (3, OperandKind::Input, IDENTITY_SWIZZLE),
                    UNUSED,
                ),
            ],
        );

        assert_eq!(
            indoc! {"
                #version 450

                layout(std430, binding = 1) readonly buffer CBUFFER_DATA_1 {
                    vec4 data[];
                } cb1;

                uniform sampler2D fp_s0;

                layout(location = 0) in vec4 in_attr0;

                layout(location = 0) out vec4 out_attr0;

                void main() {
                    vec4 R0 = vec4(0.0);
                    vec4 R1 = vec4(0.0);
                    R0.x = cb1.data[2].x;
                    R0.y = cb1.data[2].y;
                    R0.z = cb1.data[2].z;
                    R0.w = cb1.data[2].w;
                    R1.x = texture(fp_s0, vec2(R0.x, R0.y)).x;
                    R1.y = texture(fp_s0, vec2(R0.x, R0.y)).y;
                    out_attr0.x = R1.x * in_attr0.x;
                    return;
                }
            "},
            translated.source
        );

        let reflection = translated.reflection.unwrap();
        assert_eq!(
            (0..4)
                .map(|channel| ConstantAccess {
                    block: 1,
                    index: 2,
                    channel
                })
                .collect::<BTreeSet<_>>(),
            reflection.constant_accesses
        );
        assert_eq!(BTreeSet::from([0]), reflection.samplers);
    }

    #[test]
    fn translate_vertex_swizzle_same_register() {
        let translated = translate(
            ShaderStage::Vertex,
            vec![
                instruction(
                    Opcode::Mov,
                    0,
                    0b0011,
                    DestinationKind::Register,
                    (0, OperandKind::Input, IDENTITY_SWIZZLE),
                    UNUSED,
                ),
                instruction(
                    Opcode::Mov,
                    0,
                    0b0011,
                    DestinationKind::Register,
                    (0, OperandKind::Register, 0b11_10_00_01),
                    UNUSED,
                ),
                instruction(
                    Opcode::Dp4,
                    0,
                    0b1000,
                    DestinationKind::Output,
                    (0, OperandKind::Register, IDENTITY_SWIZZLE),
                    (1, OperandKind::Immediate, IDENTITY_SWIZZLE),
                ),
            ],
        );

        assert_eq!(
            indoc! {"
                #version 450

                layout(location = 0) in vec4 in_attr0;

                void main() {
                    vec4 R0 = vec4(0.0);
                    vec4 tmp = vec4(0.0);
                    R0.x = in_attr0.x;
                    R0.y = in_attr0.y;
                    tmp.x = R0.y;
                    tmp.y = R0.x;
                    R0.x = tmp.x;
                    R0.y = tmp.y;
                    gl_Position.w = (((R0.x * 1.0) + (R0.y * 1.0)) + (R0.z * 1.0)) + (R0.w * 1.0);
                    return;
                }
            "},
            translated.source
        );
        assert_eq!(Some(StageReflection::default()), translated.reflection);
    }

    #[test]
    fn translate_negate_reciprocal() {
        let mut rcp = instruction(
            Opcode::Rcp,
            0,
            0b0001,
            DestinationKind::Output,
            (2, OperandKind::Input, 0b00_00_00_11),
            UNUSED,
        );
        rcp.set_negate_a(true);

        let translated = translate(ShaderStage::Fragment, vec![rcp]);
        assert!(translated
            .source
            .contains("    out_attr0.x = 1.0 / (-in_attr2.w);\n"));
    }

    #[test]
    fn translate_stage_mismatch() {
        let bytes = IsaBinary::new(ShaderStage::Vertex, Vec::new())
            .to_bytes()
            .unwrap();
        let result = translate_isa(&StageBinary {
            flavor: BinaryFlavor::Isa,
            stage: ShaderStage::Fragment,
            bytes: &bytes,
        });
        assert!(matches!(
            result,
            Err(TranslateError::StageMismatch {
                expected: ShaderStage::Fragment,
                actual: ShaderStage::Vertex
            })
        ));
    }

    #[test]
    fn translate_truncated() {
        let result = translate_isa(&StageBinary {
            flavor: BinaryFlavor::Isa,
            stage: ShaderStage::Fragment,
            bytes: b"TBXI",
        });
        assert!(matches!(result, Err(TranslateError::Malformed(_))));
    }

    #[test]
    fn translate_is_deterministic() {
        let bytes = IsaBinary::new(
            ShaderStage::Fragment,
            vec![instruction(
                Opcode::Max,
                0,
                0b1111,
                DestinationKind::Output,
                (0, OperandKind::Input, IDENTITY_SWIZZLE),
                (0, OperandKind::Immediate, IDENTITY_SWIZZLE),
            )],
        )
        .to_bytes()
        .unwrap();
        let binary = StageBinary {
            flavor: BinaryFlavor::Isa,
            stage: ShaderStage::Fragment,
            bytes: &bytes,
        };
        assert_eq!(translate_isa(&binary).unwrap(), translate_isa(&binary).unwrap());
    }
}
