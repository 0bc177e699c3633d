//! Identifiers that emitted MSL must never collide with.

pub const RESERVED: &[&str] = &[
    // C++ keywords
    "alignas",
    "alignof",
    "and",
    "asm",
    "auto",
    "bool",
    "break",
    "case",
    "catch",
    "char",
    "class",
    "const",
    "constexpr",
    "continue",
    "decltype",
    "default",
    "delete",
    "do",
    "double",
    "else",
    "enum",
    "explicit",
    "extern",
    "false",
    "float",
    "for",
    "friend",
    "goto",
    "if",
    "inline",
    "int",
    "long",
    "mutable",
    "namespace",
    "new",
    "noexcept",
    "not",
    "nullptr",
    "operator",
    "or",
    "private",
    "protected",
    "public",
    "register",
    "return",
    "short",
    "signed",
    "sizeof",
    "static",
    "static_assert",
    "struct",
    "switch",
    "template",
    "this",
    "throw",
    "true",
    "try",
    "typedef",
    "typeid",
    "typename",
    "union",
    "unsigned",
    "using",
    "virtual",
    "void",
    "volatile",
    "while",
    // Metal address spaces and qualifiers
    "constant",
    "device",
    "threadgroup",
    "thread",
    "kernel",
    "vertex",
    "fragment",
    // Metal type names without the namespace
    "atomic_int",
    "atomic_uint",
    "bool2",
    "bool3",
    "bool4",
    "char2",
    "char3",
    "char4",
    "float2",
    "float2x2",
    "float2x3",
    "float2x4",
    "float3",
    "float3x2",
    "float3x3",
    "float3x4",
    "float4",
    "float4x2",
    "float4x3",
    "float4x4",
    "half2",
    "half3",
    "half4",
    "int2",
    "int3",
    "int4",
    "sampler",
    "short2",
    "short3",
    "short4",
    "texture1d",
    "texture2d",
    "texture2d_array",
    "texture2d_ms",
    "texture3d",
    "texturecube",
    "texturecube_array",
    "uchar2",
    "uchar3",
    "uchar4",
    "uint",
    "uint2",
    "uint3",
    "uint4",
    "ushort2",
    "ushort3",
    "ushort4",
    // library namespace
    "metal",
    "simd",
    // entry point plumbing emitted by this backend
    "main0",
];
