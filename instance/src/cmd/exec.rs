use instance::SingleInstance;

pub(crate) async fn run_exec(ctx: &crate::Ctx, args: Vec<String>) -> anyhow::Result<i32> {
    let mut instance = SingleInstance::new(ctx.config.clone());
    let quit = instance.quit_handle();
    crate::quit_on_ctrl_c(quit.clone());

    let id = instance.instance_id().to_string();
    instance.set_startup_function(move || {
        println!("instance running: id={id}");
        println!("start another with --quit as first argument to exit");
        0
    });
    instance.on_message(move |args| {
        println!("new instance: {:?}", args);
        if crate::is_quit_request(&args) {
            quit.quit(0);
        }
    });

    let code = instance.single_exec(&args, true).await;
    log::debug!("run: finished code={} state={:?}", code, instance.state());
    Ok(code)
}
