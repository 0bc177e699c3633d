//! Identifiers that emitted GLSL must never collide with.

pub const RESERVED: &[&str] = &[
    // keywords
    "attribute",
    "bool",
    "break",
    "buffer",
    "bvec2",
    "bvec3",
    "bvec4",
    "case",
    "centroid",
    "coherent",
    "const",
    "continue",
    "default",
    "discard",
    "do",
    "double",
    "else",
    "false",
    "flat",
    "float",
    "for",
    "highp",
    "if",
    "in",
    "inout",
    "int",
    "invariant",
    "isampler2D",
    "isampler3D",
    "isamplerCube",
    "ivec2",
    "ivec3",
    "ivec4",
    "layout",
    "lowp",
    "mat2",
    "mat2x2",
    "mat2x3",
    "mat2x4",
    "mat3",
    "mat3x2",
    "mat3x3",
    "mat3x4",
    "mat4",
    "mat4x2",
    "mat4x3",
    "mat4x4",
    "mediump",
    "noperspective",
    "out",
    "patch",
    "precision",
    "readonly",
    "restrict",
    "return",
    "sample",
    "sampler",
    "sampler1D",
    "sampler2D",
    "sampler2DArray",
    "sampler2DMS",
    "sampler2DShadow",
    "sampler3D",
    "samplerCube",
    "samplerCubeArray",
    "samplerCubeShadow",
    "shared",
    "smooth",
    "struct",
    "switch",
    "texture",
    "true",
    "uimage2D",
    "uint",
    "uniform",
    "usampler2D",
    "usampler3D",
    "usamplerCube",
    "uvec2",
    "uvec3",
    "uvec4",
    "varying",
    "vec2",
    "vec3",
    "vec4",
    "void",
    "volatile",
    "while",
    "writeonly",
    // builtin variables and functions that emitted code calls
    "main",
    "gl_Position",
    "gl_FragCoord",
    "gl_FragDepth",
    "gl_VertexID",
    "gl_InstanceID",
    "gl_FrontFacing",
    "gl_GlobalInvocationID",
    "gl_LocalInvocationID",
    "gl_LocalInvocationIndex",
    "gl_WorkGroupID",
    "gl_NumWorkGroups",
    "gl_SampleID",
    "gl_SampleMask",
    "mix",
    "equal",
    "barrier",
    "memoryBarrierBuffer",
    "memoryBarrierShared",
    "texelFetch",
    "textureSize",
    "textureLod",
    "textureGrad",
    "imageLoad",
    "imageStore",
    "imageSize",
];
