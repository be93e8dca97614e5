use bevy::{math::Vec4Swizzles, prelude::*};
use bevy_prototype_debug_lines::DebugLines;

/// Draw the frustum of a finite view-projection matrix, near plane dark and far plane light.
pub fn draw_frustum(view_projection: Mat4, lines: &mut DebugLines) {
    const NEAR_COLOR: Color = Color::BLACK;
    const FAR_COLOR: Color = Color::WHITE;

    let inv_viewprojection = view_projection.inverse();

    let frustum_corners_world = [
        Vec4::new(-1., -1., 0., 1.),
        Vec4::new( 1., -1., 0., 1.),
        Vec4::new(-1.,  1., 0., 1.),
        Vec4::new( 1.,  1., 0., 1.),
        Vec4::new(-1., -1.,  1., 1.),
        Vec4::new( 1., -1.,  1., 1.),
        Vec4::new(-1.,  1.,  1., 1.),
        Vec4::new( 1.,  1.,  1., 1.),
    ].into_iter().map(|v| {
        let vh = inv_viewprojection * v;
        vh.xyz() / vh.w
    }).collect::<Vec<_>>();

    // Depth lines
    for i in 0..4 {
        lines.line_gradient(frustum_corners_world[i], frustum_corners_world[i + 4], 0., NEAR_COLOR, FAR_COLOR);
    }

    // Near and far planes
    for (offset, color) in [(0, NEAR_COLOR), (4, FAR_COLOR)] {
        lines.line_colored(frustum_corners_world[offset], frustum_corners_world[offset + 1], 0., color);
        lines.line_colored(frustum_corners_world[offset], frustum_corners_world[offset + 2], 0., color);
        lines.line_colored(frustum_corners_world[offset + 1], frustum_corners_world[offset + 3], 0., color);
        lines.line_colored(frustum_corners_world[offset + 2], frustum_corners_world[offset + 3], 0., color);
    }
}

/// Closed polyline through `points`.
pub fn draw_loop(points: &[Vec3], color: Color, lines: &mut DebugLines) {
    for (i, start) in points.iter().enumerate() {
        let end = points[(i + 1) % points.len()];
        lines.line_colored(*start, end, 0., color);
    }
}

/// Box of `half_extents` world units, oriented and centered like `transform`.
pub fn draw_box(transform: &Transform, half_extents: Vec3, color: Color, lines: &mut DebugLines) {
    let corner = |x: f32, y: f32, z: f32| {
        transform.translation + transform.rotation * (half_extents * Vec3::new(x, y, z))
    };
    let back = [corner(-1., -1., -1.), corner(1., -1., -1.), corner(1., 1., -1.), corner(-1., 1., -1.)];
    let front = [corner(-1., -1., 1.), corner(1., -1., 1.), corner(1., 1., 1.), corner(-1., 1., 1.)];
    draw_loop(&back, color, lines);
    draw_loop(&front, color, lines);
    for (start, end) in back.into_iter().zip(front) {
        lines.line_colored(start, end, 0., color);
    }
}
