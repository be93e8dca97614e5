#![allow(clippy::type_complexity)]

use bevy::prelude::*;

use seamless_portals::plugins::game::GamePlugin;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            window: WindowDescriptor {
                title: "Seamless portals".to_string(),
                width: 1280.,
                height: 720.,
                ..default()
            },
            ..default()
        }))
        .add_plugin(GamePlugin)
        .run();
}
